//! Extra Trees (Extremely Randomized Trees) implementation
//!
//! Unlike a random forest, which searches for the best threshold among a
//! random subset of features, extra trees draw the threshold at random too,
//! and grow each tree on the full dataset instead of a bootstrap sample.

use super::random_forest::MaxFeatures;
use crate::error::{AnomalyError, Result};
use ndarray::{Array1, Array2};
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum ExtraTreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<ExtraTreeNode>,
        right: Box<ExtraTreeNode>,
    },
}

impl ExtraTreeNode {
    fn predict_sample(&self, sample: &[f64]) -> f64 {
        match self {
            ExtraTreeNode::Leaf { value } => *value,
            ExtraTreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] <= *threshold {
                    left.predict_sample(sample)
                } else {
                    right.predict_sample(sample)
                }
            }
        }
    }
}

/// Extra trees binary classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraTrees {
    trees: Vec<ExtraTreeNode>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub seed: u64,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl ExtraTrees {
    pub fn new(n_estimators: usize, seed: u64) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            seed,
            n_features: 0,
            feature_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(AnomalyError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }

        self.n_features = n_features;
        let max_features = self.max_features.resolve(n_features);
        let all_indices: Vec<usize> = (0..n_samples).collect();

        let base_seed = self.seed;
        let max_depth = self.max_depth;
        let min_split = self.min_samples_split;
        let min_leaf = self.min_samples_leaf;

        // No bootstrap: each tree sees the full dataset
        let built: Vec<(ExtraTreeNode, Vec<f64>)> = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));
                let mut importances = vec![0.0; n_features];
                let tree = build_tree(
                    x,
                    y,
                    &all_indices,
                    max_features,
                    max_depth,
                    min_split,
                    min_leaf,
                    0,
                    &mut rng,
                    &mut importances,
                );
                (tree, importances)
            })
            .collect();

        let mut total = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(built.len());
        for (tree, importances) in built {
            for (i, v) in importances.into_iter().enumerate() {
                total[i] += v;
            }
            trees.push(tree);
        }
        let sum: f64 = total.iter().sum();
        if sum > 0.0 {
            for imp in &mut total {
                *imp /= sum;
            }
        }

        self.trees = trees;
        self.feature_importances = Some(Array1::from_vec(total));
        Ok(self)
    }

    /// Fraction of trees voting for the positive class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(AnomalyError::ModelNotFitted);
        }

        let n_trees = self.trees.len() as f64;
        let proba: Vec<f64> = (0..x.nrows())
            .map(|i| {
                let sample = x.row(i).to_vec();
                let votes = self
                    .trees
                    .iter()
                    .filter(|t| t.predict_sample(&sample).round() as i64 == 1)
                    .count();
                votes as f64 / n_trees
            })
            .collect();
        Ok(Array1::from_vec(proba))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }
}

#[allow(clippy::too_many_arguments)]
fn build_tree(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    max_features: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    depth: usize,
    rng: &mut ChaCha8Rng,
    importances: &mut [f64],
) -> ExtraTreeNode {
    let n = indices.len();

    if n < min_samples_split || n <= 1 || max_depth.map_or(false, |d| depth >= d) {
        return ExtraTreeNode::Leaf {
            value: leaf_value(y, indices),
        };
    }

    let first_y = y[indices[0]];
    if indices.iter().all(|&i| (y[i] - first_y).abs() < 1e-15) {
        return ExtraTreeNode::Leaf { value: first_y };
    }

    let feature_indices = random_features(x.ncols(), max_features, rng);
    let parent = gini_impurity(y, indices);

    let mut best_feature = feature_indices[0];
    let mut best_threshold = 0.0;
    let mut best_score = f64::MAX;
    let mut found_valid_split = false;

    for &f in &feature_indices {
        let mut fmin = f64::MAX;
        let mut fmax = f64::MIN;
        for &i in indices {
            let v = x[[i, f]];
            if v < fmin {
                fmin = v;
            }
            if v > fmax {
                fmax = v;
            }
        }
        if (fmax - fmin).abs() < 1e-15 {
            continue;
        }

        // Threshold drawn uniformly between the observed min and max
        let r = (rng.next_u64() as f64) / (u64::MAX as f64);
        let threshold = fmin + r * (fmax - fmin);

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| x[[i, f]] <= threshold);

        if left_idx.len() < min_samples_leaf || right_idx.len() < min_samples_leaf {
            continue;
        }

        let score = gini_split(y, &left_idx, &right_idx);
        if score < best_score {
            best_score = score;
            best_feature = f;
            best_threshold = threshold;
            found_valid_split = true;
        }
    }

    if !found_valid_split {
        return ExtraTreeNode::Leaf {
            value: leaf_value(y, indices),
        };
    }

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| x[[i, best_feature]] <= best_threshold);

    importances[best_feature] += n as f64 * (parent - best_score).max(0.0);

    let left = build_tree(
        x,
        y,
        &left_idx,
        max_features,
        max_depth,
        min_samples_split,
        min_samples_leaf,
        depth + 1,
        rng,
        importances,
    );
    let right = build_tree(
        x,
        y,
        &right_idx,
        max_features,
        max_depth,
        min_samples_split,
        min_samples_leaf,
        depth + 1,
        rng,
        importances,
    );

    ExtraTreeNode::Split {
        feature: best_feature,
        threshold: best_threshold,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn random_features(n_features: usize, max_features: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    if max_features >= n_features {
        return (0..n_features).collect();
    }
    let mut features: Vec<usize> = (0..n_features).collect();
    // Fisher-Yates partial shuffle
    for i in 0..max_features {
        let j = i + (rng.next_u64() as usize) % (n_features - i);
        features.swap(i, j);
    }
    features.truncate(max_features);
    features
}

fn leaf_value(y: &Array1<f64>, indices: &[usize]) -> f64 {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for &i in indices {
        *counts.entry(y[i].round() as i64).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(k, _)| k as f64)
        .unwrap_or(0.0)
}

fn gini_split(y: &Array1<f64>, left: &[usize], right: &[usize]) -> f64 {
    let n = (left.len() + right.len()) as f64;
    let lg = gini_impurity(y, left);
    let rg = gini_impurity(y, right);
    (left.len() as f64 * lg + right.len() as f64 * rg) / n
}

fn gini_impurity(y: &Array1<f64>, indices: &[usize]) -> f64 {
    let n = indices.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for &i in indices {
        *counts.entry(y[i].round() as i64).or_insert(0) += 1;
    }
    1.0 - counts.values().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable_data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 5.0],
            [0.1, 4.0],
            [0.2, 6.0],
            [1.0, 5.5],
            [1.1, 4.5],
            [1.2, 5.0],
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_classifier_accuracy() {
        let (x, y) = separable_data();
        let mut et = ExtraTrees::new(50, 42).with_max_features(MaxFeatures::All);
        et.fit(&x, &y).unwrap();

        let predictions = et.predict(&x).unwrap();
        let accuracy = predictions
            .iter()
            .zip(y.iter())
            .filter(|(p, a)| (*p - *a).abs() < 0.5)
            .count() as f64
            / y.len() as f64;
        assert!(accuracy >= 0.8, "accuracy too low: {}", accuracy);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let (x, y) = separable_data();
        let mut a = ExtraTrees::new(20, 9);
        let mut b = ExtraTrees::new(20, 9);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_importances_normalized() {
        let (x, y) = separable_data();
        let mut et = ExtraTrees::new(30, 42);
        et.fit(&x, &y).unwrap();

        let imp = et.feature_importances().unwrap();
        let sum: f64 = imp.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
