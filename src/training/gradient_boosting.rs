//! Gradient boosting implementation
//!
//! Binary classifier boosting shallow regression trees on the log-loss
//! gradient. Trees fit the residual (label minus predicted probability) and
//! their shrunken outputs accumulate in log-odds space.

use super::decision_tree::DecisionTree;
use crate::error::{AnomalyError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    trees: Vec<DecisionTree>,
    initial_log_odds: f64,
    feature_importances: Option<Array1<f64>>,
}

impl GradientBoosting {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            n_estimators,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 1,
            trees: Vec::new(),
            initial_log_odds: 0.0,
            feature_importances: None,
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
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

        // Initial prediction: log odds of the positive rate
        let p = y.mean().unwrap_or(0.5).clamp(1e-10, 1.0 - 1e-10);
        self.initial_log_odds = (p / (1.0 - p)).ln();

        let mut log_odds = Array1::from_elem(n_samples, self.initial_log_odds);
        let mut importances = vec![0.0; n_features];
        self.trees = Vec::with_capacity(self.n_estimators);

        for _ in 0..self.n_estimators {
            // Log-loss gradient: residual = y - sigmoid(log_odds)
            let residuals: Array1<f64> = y
                .iter()
                .zip(log_odds.iter())
                .map(|(yi, &lo)| yi - sigmoid(lo))
                .collect();

            let mut tree = DecisionTree::new_regressor()
                .with_max_depth(self.max_depth)
                .with_min_samples_leaf(self.min_samples_leaf);
            tree.fit(x, &residuals)?;

            let tree_pred = tree.predict(x)?;
            for i in 0..n_samples {
                log_odds[i] += self.learning_rate * tree_pred[i];
            }

            if let Some(tree_importance) = tree.feature_importances() {
                for (j, &v) in tree_importance.iter().enumerate() {
                    importances[j] += v;
                }
            }
            self.trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));

        Ok(self)
    }

    /// Positive-class probability
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(AnomalyError::ModelNotFitted);
        }

        let n = x.nrows();
        let mut log_odds = Array1::from_elem(n, self.initial_log_odds);
        for tree in &self.trees {
            let tree_pred = tree.predict(x)?;
            for i in 0..n {
                log_odds[i] += self.learning_rate * tree_pred[i];
            }
        }
        Ok(log_odds.mapv(sigmoid))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
