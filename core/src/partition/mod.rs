//! Train/validation partitioning
//!
//! Two splitters share the same per-class grouping:
//!
//! - [`StratifiedSplitter`]: one train/validation split with an exact
//!   per-class quota of `ceil(p × n)` training samples
//! - [`KFoldSplitter`]: K folds whose validation sets partition every class
//!
//! Both draw from a caller-supplied random source so runs can be reproduced
//! from a logged seed.

mod kfold;
mod stratified;

pub use kfold::{balanced_chunks, KFoldPartition, KFoldSplitter};
pub use stratified::{train_quota, StratifiedSplitter};

use crate::samples::SampleStore;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Disjoint sets of sample IDs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionResult {
    pub train: BTreeSet<u64>,
    pub validation: BTreeSet<u64>,
    /// Classes too small for the requested split
    pub warnings: Vec<DegenerateClass>,
}

impl PartitionResult {
    /// Get number of training samples
    pub fn train_size(&self) -> usize {
        self.train.len()
    }

    /// Get number of validation samples
    pub fn validation_size(&self) -> usize {
        self.validation.len()
    }

    pub fn is_disjoint(&self) -> bool {
        self.train.is_disjoint(&self.validation)
    }
}

/// Non-fatal warning: a class has too few samples for the requested split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegenerateClass {
    pub class_label: u32,
    pub population: usize,
    pub detail: String,
}

impl fmt::Display for DegenerateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "class {} ({} samples): {}",
            self.class_label, self.population, self.detail
        )
    }
}

/// How the training quota is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProportionType {
    /// `ceil(p × n_c)` for every class independently
    #[default]
    ByClass,
    /// `ceil(p × N)` over the whole store
    Global,
}

impl fmt::Display for ProportionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByClass => write!(f, "by_class"),
            Self::Global => write!(f, "global"),
        }
    }
}

impl std::str::FromStr for ProportionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "by_class" | "by-class" | "class" => Ok(Self::ByClass),
            "global" => Ok(Self::Global),
            _ => Err(format!("Unknown proportion type: {}. Valid: by_class, global", s)),
        }
    }
}

/// Sample IDs grouped by class, each group shuffled. Classes are visited in
/// label order so a seeded source gives the same result every time.
pub(crate) fn shuffled_classes<R: Rng + ?Sized>(
    store: &SampleStore,
    rng: &mut R,
) -> BTreeMap<u32, Vec<u64>> {
    let mut groups = store.ids_by_class();
    for ids in groups.values_mut() {
        ids.shuffle(rng);
    }
    groups
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::samples::{Sample, SampleStore};
    use crate::vector::{Geometry, GeometryType, Point, SpatialRef};

    /// Store with `sizes[i].1` samples of class `sizes[i].0`, IDs from 0
    pub fn store_with_classes(sizes: &[(u32, usize)]) -> SampleStore {
        let mut store = SampleStore::new(
            SpatialRef::new("EPSG:32631"),
            GeometryType::Point,
            vec!["class".to_string(), "expand".to_string()],
        );
        let mut id = 0u64;
        for (class, count) in sizes {
            for _ in 0..*count {
                let point = Point::new(id as f64 * 10.0, 0.0);
                store
                    .push(Sample::new(id, *class, Geometry::Point(point)))
                    .unwrap();
                id += 1;
            }
        }
        store
    }
}
