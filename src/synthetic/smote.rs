//! SMOTE over-sampling

use crate::error::{AnomalyError, Result};
use crate::synthetic::{class_counts, class_indices, ResampleResult, Sampler};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;

/// Ordered float for BinaryHeap-based partial sort
#[derive(Debug, Clone, Copy)]
struct DistIdx(f64, usize);

impl PartialEq for DistIdx {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for DistIdx {}
impl PartialOrd for DistIdx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DistIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// SMOTE (Synthetic Minority Over-sampling Technique)
///
/// Generates synthetic minority samples by interpolating between a minority
/// point and one of its k nearest same-class neighbors. Always seeded: the
/// same inputs and seed produce the same synthetic rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Smote {
    /// Number of nearest neighbors
    k_neighbors: usize,
    /// Random seed
    seed: u64,
    /// Target samples per class, computed at fit time
    target_counts: Option<HashMap<i64, usize>>,
    /// Set at fit time when the partition cannot be balanced
    skip_reason: Option<String>,
}

impl Smote {
    pub fn new(seed: u64) -> Self {
        Self {
            k_neighbors: 5,
            seed,
            target_counts: None,
            skip_reason: None,
        }
    }

    /// Set number of neighbors
    pub fn with_k_neighbors(mut self, k: usize) -> Self {
        self.k_neighbors = k.max(1);
        self
    }

    /// Euclidean distance
    fn distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(ai, bi)| (ai - bi).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Find k nearest neighbors using BinaryHeap (O(n log k) instead of O(n log n))
    fn find_neighbors(&self, point_idx: usize, data: &[Vec<f64>], k: usize) -> Vec<usize> {
        let point = &data[point_idx];
        let mut heap: BinaryHeap<DistIdx> = BinaryHeap::with_capacity(k + 1);

        for (i, d) in data.iter().enumerate() {
            if i == point_idx {
                continue;
            }
            let dist = Self::distance(point, d);
            if heap.len() < k {
                heap.push(DistIdx(dist, i));
            } else if let Some(&DistIdx(max_dist, _)) = heap.peek() {
                if dist < max_dist {
                    heap.pop();
                    heap.push(DistIdx(dist, i));
                }
            }
        }

        let mut neighbors: Vec<usize> = heap.into_iter().map(|DistIdx(_, i)| i).collect();
        neighbors.sort_unstable();
        neighbors
    }

    /// Generate synthetic sample between two points
    fn generate_sample(point: &[f64], neighbor: &[f64], rng: &mut ChaCha8Rng) -> Vec<f64> {
        let gap: f64 = rng.gen();
        point
            .iter()
            .zip(neighbor.iter())
            .map(|(&p, &n)| p + gap * (n - p))
            .collect()
    }

    fn passthrough(x: &Array2<f64>, y: &Array1<i64>, reason: &str) -> ResampleResult {
        ResampleResult {
            x: x.clone(),
            y: y.clone(),
            n_synthetic: Vec::new(),
            skipped: Some(reason.to_string()),
        }
    }
}

impl Sampler for Smote {
    fn fit(&mut self, _x: &Array2<f64>, y: &Array1<i64>) -> Result<()> {
        let counts = class_counts(y);
        self.skip_reason = None;

        // A single-class partition is a pass-through, not an error: the fold
        // report records the reason and training continues unbalanced.
        if counts.len() < 2 {
            self.skip_reason = Some("skipped: single class".to_string());
            self.target_counts = None;
            return Ok(());
        }

        // Balance every class up to the majority count.
        let max_count = *counts.values().max().unwrap();
        let mut targets = HashMap::new();
        for (&class, &count) in &counts {
            targets.insert(class, max_count.max(count));
        }

        self.target_counts = Some(targets);
        Ok(())
    }

    fn resample(&self, x: &Array2<f64>, y: &Array1<i64>) -> Result<ResampleResult> {
        if let Some(reason) = &self.skip_reason {
            return Ok(Self::passthrough(x, y, reason));
        }
        let targets = self
            .target_counts
            .as_ref()
            .ok_or_else(|| AnomalyError::ValidationError("SMOTE not fitted".to_string()))?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let indices = class_indices(y);
        let counts = class_counts(y);
        let n_features = x.ncols();

        // Ascending class order keeps the RNG stream deterministic.
        let mut classes: Vec<i64> = targets.keys().copied().collect();
        classes.sort_unstable();

        // Collect only synthetic samples (original data reused from x directly)
        let mut synthetic_x: Vec<Vec<f64>> = Vec::new();
        let mut synthetic_y: Vec<i64> = Vec::new();
        let mut n_synthetic = Vec::new();

        for &class in &classes {
            let target_count = targets[&class];
            let current_count = counts.get(&class).copied().unwrap_or(0);
            let n_to_generate = target_count.saturating_sub(current_count);

            if n_to_generate == 0 {
                n_synthetic.push(0);
                continue;
            }

            // Get samples for this class
            let class_idx = indices.get(&class).unwrap();
            let class_samples: Vec<Vec<f64>> = class_idx
                .iter()
                .map(|&i| x.row(i).iter().copied().collect())
                .collect();

            // A singleton minority class has no neighbor to interpolate with;
            // replicate the point instead.
            if class_samples.len() == 1 {
                for _ in 0..n_to_generate {
                    synthetic_x.push(class_samples[0].clone());
                    synthetic_y.push(class);
                }
                n_synthetic.push(n_to_generate);
                continue;
            }

            let k = self.k_neighbors.min(class_samples.len() - 1).max(1);

            for _ in 0..n_to_generate {
                let idx = rng.gen_range(0..class_samples.len());
                let neighbors = self.find_neighbors(idx, &class_samples, k);
                let neighbor_idx = neighbors[rng.gen_range(0..neighbors.len())];

                synthetic_x.push(Self::generate_sample(
                    &class_samples[idx],
                    &class_samples[neighbor_idx],
                    &mut rng,
                ));
                synthetic_y.push(class);
            }

            n_synthetic.push(n_to_generate);
        }

        // Build result: original rows + synthetic rows
        let n_original = x.nrows();
        let n_total = n_original + synthetic_x.len();
        let result_x = Array2::from_shape_fn((n_total, n_features), |(i, j)| {
            if i < n_original {
                x[[i, j]]
            } else {
                synthetic_x[i - n_original][j]
            }
        });

        let mut all_y: Vec<i64> = y.iter().copied().collect();
        all_y.extend_from_slice(&synthetic_y);

        Ok(ResampleResult {
            x: result_x,
            y: Array1::from_vec(all_y),
            n_synthetic,
            skipped: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_imbalanced_data() -> (Array2<f64>, Array1<i64>) {
        // 20 majority points around the origin, 5 minority around (10, 10)
        let mut data = Vec::new();
        let mut labels = Vec::new();

        for i in 0..20 {
            data.push((i % 5) as f64);
            data.push((i / 5) as f64);
            labels.push(0i64);
        }
        for i in 0..5 {
            data.push(10.0 + (i % 3) as f64);
            data.push(10.0 + (i / 3) as f64);
            labels.push(1i64);
        }

        let x = Array2::from_shape_vec((25, 2), data).unwrap();
        let y = Array1::from_vec(labels);
        (x, y)
    }

    #[test]
    fn test_smote_balances_classes() {
        let (x, y) = create_imbalanced_data();
        let mut smote = Smote::new(42).with_k_neighbors(3);
        let result = smote.fit_resample(&x, &y).unwrap();

        let counts = class_counts(&result.y);
        assert_eq!(counts[&0], 20);
        assert_eq!(counts[&1], 20);
        assert!(result.skipped.is_none());
    }

    #[test]
    fn test_smote_preserves_original_rows() {
        let (x, y) = create_imbalanced_data();
        let mut smote = Smote::new(42);
        let result = smote.fit_resample(&x, &y).unwrap();

        for i in 0..x.nrows() {
            for j in 0..x.ncols() {
                assert_eq!(result.x[[i, j]], x[[i, j]]);
            }
        }
    }

    #[test]
    fn test_smote_synthetic_rows_interpolate() {
        let (x, y) = create_imbalanced_data();
        let mut smote = Smote::new(42).with_k_neighbors(3);
        let result = smote.fit_resample(&x, &y).unwrap();

        // Synthetic minority rows stay inside the minority bounding box.
        for i in x.nrows()..result.x.nrows() {
            assert_eq!(result.y[i], 1);
            assert!(result.x[[i, 0]] >= 10.0 && result.x[[i, 0]] <= 12.0);
            assert!(result.x[[i, 1]] >= 10.0 && result.x[[i, 1]] <= 11.0);
        }
    }

    #[test]
    fn test_smote_deterministic_with_seed() {
        let (x, y) = create_imbalanced_data();
        let a = Smote::new(7).with_k_neighbors(3).fit_resample(&x, &y).unwrap();
        let b = Smote::new(7).with_k_neighbors(3).fit_resample(&x, &y).unwrap();
        assert_eq!(a.x, b.x);
        assert_eq!(a.y, b.y);
    }

    #[test]
    fn test_smote_single_class_is_noop() {
        let x = Array2::from_shape_vec((4, 2), vec![0.0; 8]).unwrap();
        let y = Array1::from_vec(vec![1i64; 4]);
        let mut smote = Smote::new(42);
        let result = smote.fit_resample(&x, &y).unwrap();

        assert_eq!(result.x, x);
        assert_eq!(result.y, y);
        assert_eq!(result.skipped.as_deref(), Some("skipped: single class"));
    }
}
