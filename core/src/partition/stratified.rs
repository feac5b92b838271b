//! Stratified train/validation split

use super::{shuffled_classes, DegenerateClass, PartitionResult, ProportionType};
use crate::error::{AlcdError, Result};
use crate::samples::SampleStore;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

/// Number of training samples for a group of `n`: `ceil(proportion × n)`.
///
/// The product is scaled down by a relative epsilon first so that values
/// such as `0.1 × 30 = 3.0000000000000004` round to 3, not 4.
pub fn train_quota(proportion: f64, n: usize) -> usize {
    let exact = proportion * n as f64;
    let quota = (exact * (1.0 - 1e-12)).ceil().max(0.0) as usize;
    quota.min(n)
}

/// Splits a sample store into training and validation sets
#[derive(Debug, Clone)]
pub struct StratifiedSplitter {
    /// Fraction of each class that goes to training
    proportion: f64,
    proportion_type: ProportionType,
}

impl StratifiedSplitter {
    /// Create a splitter. `proportion` must lie in `(0, 1]`.
    pub fn new(proportion: f64) -> Result<Self> {
        if !(proportion > 0.0 && proportion <= 1.0) {
            return Err(AlcdError::config(format!(
                "training proportion must be in (0, 1], got {}",
                proportion
            )));
        }
        Ok(Self {
            proportion,
            proportion_type: ProportionType::ByClass,
        })
    }

    pub fn with_proportion_type(mut self, proportion_type: ProportionType) -> Self {
        self.proportion_type = proportion_type;
        self
    }

    pub fn proportion(&self) -> f64 {
        self.proportion
    }

    pub fn proportion_type(&self) -> ProportionType {
        self.proportion_type
    }

    /// Split the store
    pub fn split<R: Rng + ?Sized>(&self, store: &SampleStore, rng: &mut R) -> PartitionResult {
        let mut result = PartitionResult::default();
        if store.is_empty() {
            return result;
        }

        match self.proportion_type {
            ProportionType::ByClass => {
                for (class, ids) in shuffled_classes(store, rng) {
                    let cutoff = train_quota(self.proportion, ids.len());
                    result.train.extend(&ids[..cutoff]);
                    result.validation.extend(&ids[cutoff..]);

                    if cutoff == ids.len() && self.proportion < 1.0 {
                        let warning = DegenerateClass {
                            class_label: class,
                            population: ids.len(),
                            detail: "no validation sample left".to_string(),
                        };
                        warn!(class, population = ids.len(), "Class too small for a validation set");
                        result.warnings.push(warning);
                    }
                }
            }
            ProportionType::Global => {
                let mut ids: Vec<u64> = store.samples().iter().map(|s| s.id).collect();
                ids.shuffle(rng);
                let cutoff = train_quota(self.proportion, ids.len());
                result.train.extend(&ids[..cutoff]);
                result.validation.extend(&ids[cutoff..]);
            }
        }

        info!(
            proportion = self.proportion,
            mode = %self.proportion_type,
            train = result.train_size(),
            validation = result.validation_size(),
            "Split samples"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::test_support::store_with_classes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn class_ids(store: &SampleStore, class: u32) -> BTreeSet<u64> {
        store.ids_by_class()[&class].iter().copied().collect()
    }

    #[test]
    fn test_rejects_invalid_proportion() {
        assert!(StratifiedSplitter::new(0.0).is_err());
        assert!(StratifiedSplitter::new(-0.1).is_err());
        assert!(StratifiedSplitter::new(1.01).is_err());
        assert!(StratifiedSplitter::new(f64::NAN).is_err());
        assert!(StratifiedSplitter::new(1.0).is_ok());
    }

    #[test]
    fn test_train_quota_rounding() {
        assert_eq!(train_quota(0.7, 10), 7);
        assert_eq!(train_quota(0.7, 3), 3);
        assert_eq!(train_quota(0.1, 30), 3);
        assert_eq!(train_quota(0.5, 1), 1);
        assert_eq!(train_quota(1.0, 4), 4);
        assert_eq!(train_quota(0.3, 0), 0);
    }

    #[test]
    fn test_uneven_classes_scenario() {
        let store = store_with_classes(&[(1, 10), (2, 3)]);
        let mut rng = StdRng::seed_from_u64(7);
        let result = StratifiedSplitter::new(0.7).unwrap().split(&store, &mut rng);

        let class1 = class_ids(&store, 1);
        let class2 = class_ids(&store, 2);
        assert_eq!(result.train.intersection(&class1).count(), 7);
        assert_eq!(result.validation.intersection(&class1).count(), 3);
        assert_eq!(result.train.intersection(&class2).count(), 3);
        assert_eq!(result.validation.intersection(&class2).count(), 0);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].class_label, 2);
    }

    #[test]
    fn test_per_class_completeness() {
        let store = store_with_classes(&[(1, 17), (2, 5), (3, 1), (5, 40)]);
        for (seed, p) in [(1u64, 0.2), (2, 0.5), (3, 0.66), (4, 0.9), (5, 1.0)] {
            let mut rng = StdRng::seed_from_u64(seed);
            let result = StratifiedSplitter::new(p).unwrap().split(&store, &mut rng);
            assert!(result.is_disjoint());

            for (class, ids) in store.ids_by_class() {
                let members: BTreeSet<u64> = ids.into_iter().collect();
                let train: BTreeSet<u64> = result.train.intersection(&members).copied().collect();
                let validation: BTreeSet<u64> =
                    result.validation.intersection(&members).copied().collect();
                assert_eq!(train.len(), train_quota(p, members.len()), "class {class}, p {p}");
                let union: BTreeSet<u64> = train.union(&validation).copied().collect();
                assert_eq!(union, members);
            }
        }
    }

    #[test]
    fn test_seeded_split_is_reproducible() {
        let store = store_with_classes(&[(1, 20), (2, 20)]);
        let splitter = StratifiedSplitter::new(0.5).unwrap();
        let a = splitter.split(&store, &mut StdRng::seed_from_u64(42));
        let b = splitter.split(&store, &mut StdRng::seed_from_u64(42));
        let c = splitter.split(&store, &mut StdRng::seed_from_u64(43));
        assert_eq!(a, b);
        assert_ne!(a.train, c.train);
    }

    #[test]
    fn test_empty_store() {
        let store = store_with_classes(&[]);
        let result = StratifiedSplitter::new(0.5)
            .unwrap()
            .split(&store, &mut StdRng::seed_from_u64(1));
        assert_eq!(result, PartitionResult::default());
    }

    #[test]
    fn test_global_quota() {
        let store = store_with_classes(&[(1, 10), (2, 3)]);
        let result = StratifiedSplitter::new(0.5)
            .unwrap()
            .with_proportion_type(ProportionType::Global)
            .split(&store, &mut StdRng::seed_from_u64(9));
        assert_eq!(result.train_size(), 7);
        assert_eq!(result.validation_size(), 6);
        assert!(result.is_disjoint());
    }
}
