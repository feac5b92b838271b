//! K-fold cross-validation partitioning
//!
//! Every class is shuffled and cut into K balanced chunks on its own; chunk
//! `k` of each class joins the validation set of fold `k`. Fold membership
//! therefore never depends on how many chunks another class produced.

use super::{shuffled_classes, DegenerateClass, PartitionResult};
use crate::error::{AlcdError, Result};
use crate::samples::SampleStore;
use rand::Rng;
use std::ops::Range;
use tracing::{info, warn};

/// Cut `0..n` into `k` contiguous ranges whose lengths differ by at most one.
/// The first `n mod k` ranges hold the extra element.
pub fn balanced_chunks(n: usize, k: usize) -> Vec<Range<usize>> {
    if k == 0 {
        return Vec::new();
    }
    let base = n / k;
    let extra = n % k;
    let mut start = 0;
    (0..k)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// K train/validation pairs over one store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KFoldPartition {
    pub folds: Vec<PartitionResult>,
    /// Classes with fewer samples than folds
    pub warnings: Vec<DegenerateClass>,
}

impl KFoldPartition {
    pub fn k(&self) -> usize {
        self.folds.len()
    }

    pub fn fold(&self, k: usize) -> Option<&PartitionResult> {
        self.folds.get(k)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionResult> {
        self.folds.iter()
    }
}

/// Builds K-fold partitions
#[derive(Debug, Clone)]
pub struct KFoldSplitter {
    folds: usize,
}

impl KFoldSplitter {
    /// Create a splitter for `folds` folds. At least two are required.
    pub fn new(folds: usize) -> Result<Self> {
        if folds < 2 {
            return Err(AlcdError::config(format!(
                "K-fold needs at least 2 folds, got {}",
                folds
            )));
        }
        Ok(Self { folds })
    }

    pub fn folds(&self) -> usize {
        self.folds
    }

    pub fn k_split<R: Rng + ?Sized>(&self, store: &SampleStore, rng: &mut R) -> KFoldPartition {
        let k = self.folds;
        let mut partition = KFoldPartition {
            folds: vec![PartitionResult::default(); k],
            warnings: Vec::new(),
        };

        for (class, ids) in shuffled_classes(store, rng) {
            if ids.len() < k {
                warn!(
                    class,
                    population = ids.len(),
                    folds = k,
                    "Class has fewer samples than folds, some validation chunks are empty"
                );
                partition.warnings.push(DegenerateClass {
                    class_label: class,
                    population: ids.len(),
                    detail: format!("fewer samples than the {} folds", k),
                });
            }

            let chunks = balanced_chunks(ids.len(), k);
            for (fold_index, fold) in partition.folds.iter_mut().enumerate() {
                for (chunk_index, chunk) in chunks.iter().enumerate() {
                    let members = &ids[chunk.clone()];
                    if chunk_index == fold_index {
                        fold.validation.extend(members);
                    } else {
                        fold.train.extend(members);
                    }
                }
            }
        }

        for (index, fold) in partition.folds.iter().enumerate() {
            info!(
                fold = index,
                train = fold.train_size(),
                validation = fold.validation_size(),
                "K-fold split"
            );
        }
        partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::test_support::store_with_classes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    #[test]
    fn test_rejects_fewer_than_two_folds() {
        assert!(KFoldSplitter::new(0).is_err());
        assert!(KFoldSplitter::new(1).is_err());
        assert!(KFoldSplitter::new(2).is_ok());
    }

    #[test]
    fn test_balanced_chunks() {
        let sizes: Vec<usize> = balanced_chunks(7, 3).iter().map(|r| r.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        let sizes: Vec<usize> = balanced_chunks(2, 4).iter().map(|r| r.len()).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
        assert_eq!(balanced_chunks(9, 3).last(), Some(&(6..9)));
    }

    #[test]
    fn test_single_class_scenario() {
        let store = store_with_classes(&[(1, 7)]);
        let partition = KFoldSplitter::new(3)
            .unwrap()
            .k_split(&store, &mut StdRng::seed_from_u64(3));

        let mut sizes: Vec<usize> = partition.iter().map(|f| f.validation_size()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 2, 3]);
        for fold in partition.iter() {
            assert_eq!(fold.train_size(), 7 - fold.validation_size());
            assert!(fold.is_disjoint());
        }
        assert!(partition.warnings.is_empty());
    }

    #[test]
    fn test_full_coverage_and_balance() {
        let store = store_with_classes(&[(1, 23), (2, 5), (3, 11), (7, 2)]);
        for k in [2usize, 3, 5] {
            let partition = KFoldSplitter::new(k)
                .unwrap()
                .k_split(&store, &mut StdRng::seed_from_u64(k as u64));
            assert_eq!(partition.k(), k);

            for (_, ids) in store.ids_by_class() {
                let members: BTreeSet<u64> = ids.iter().copied().collect();
                let chunks: Vec<BTreeSet<u64>> = partition
                    .iter()
                    .map(|f| f.validation.intersection(&members).copied().collect())
                    .collect();

                // Pairwise disjoint and covering the class
                let total: usize = chunks.iter().map(|c| c.len()).sum();
                let union: BTreeSet<u64> = chunks.iter().flatten().copied().collect();
                assert_eq!(total, members.len());
                assert_eq!(union, members);

                // Sizes differ by at most one, n mod k of them larger
                let max = chunks.iter().map(|c| c.len()).max().unwrap_or(0);
                let min = chunks.iter().map(|c| c.len()).min().unwrap_or(0);
                assert!(max - min <= 1);
                if max > min {
                    let larger = chunks.iter().filter(|c| c.len() == max).count();
                    assert_eq!(larger, members.len() % k);
                }
            }

            for fold in partition.iter() {
                assert!(fold.is_disjoint());
                assert_eq!(fold.train_size() + fold.validation_size(), store.len());
            }
        }
    }

    #[test]
    fn test_small_class_warns_but_proceeds() {
        let store = store_with_classes(&[(1, 10), (2, 2)]);
        let partition = KFoldSplitter::new(4)
            .unwrap()
            .k_split(&store, &mut StdRng::seed_from_u64(11));

        assert_eq!(partition.warnings.len(), 1);
        assert_eq!(partition.warnings[0].class_label, 2);
        let class2: BTreeSet<u64> = store.ids_by_class()[&2].iter().copied().collect();
        let empty_folds = partition
            .iter()
            .filter(|f| f.validation.is_disjoint(&class2))
            .count();
        assert_eq!(empty_folds, 2);
    }
}
