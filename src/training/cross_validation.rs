//! Cross-validation splitters

use crate::error::{AnomalyError, Result};
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single train/test split
#[derive(Debug, Clone)]
pub struct FoldSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Seeded stratified k-fold splitter. Rows are shuffled within each class and
/// dealt round-robin into folds, so every fold approximates the overall class
/// ratio. The same seed always yields the same partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratifiedKFold {
    pub n_splits: usize,
    pub seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize, seed: u64) -> Self {
        Self { n_splits, seed }
    }

    pub fn split(&self, y: &Array1<i64>) -> Result<Vec<FoldSplit>> {
        let n_samples = y.len();
        if self.n_splits < 2 {
            return Err(AnomalyError::ValidationError(
                "n_splits must be at least 2".to_string(),
            ));
        }
        if n_samples < self.n_splits {
            return Err(AnomalyError::ValidationError(format!(
                "n_samples ({}) must be >= n_splits ({})",
                n_samples, self.n_splits
            )));
        }

        // Group rows by class
        let mut class_indices: HashMap<i64, Vec<usize>> = HashMap::new();
        for (idx, &class) in y.iter().enumerate() {
            class_indices.entry(class).or_default().push(idx);
        }

        // Classes in ascending order keep the RNG stream deterministic
        let mut classes: Vec<i64> = class_indices.keys().copied().collect();
        classes.sort_unstable();

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        // Shuffle within each class, then deal round-robin into folds
        let mut fold_members: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];
        for class in classes {
            let indices = class_indices.get_mut(&class).unwrap();
            indices.shuffle(&mut rng);
            for (pos, &idx) in indices.iter().enumerate() {
                fold_members[pos % self.n_splits].push(idx);
            }
        }

        let mut splits = Vec::with_capacity(self.n_splits);
        for fold_idx in 0..self.n_splits {
            let mut test_indices = fold_members[fold_idx].clone();
            let mut train_indices: Vec<usize> = fold_members
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != fold_idx)
                .flat_map(|(_, members)| members.iter().copied())
                .collect();
            test_indices.sort_unstable();
            train_indices.sort_unstable();

            splits.push(FoldSplit {
                train_indices,
                test_indices,
                fold_idx,
            });
        }

        Ok(splits)
    }
}
