//! Bernoulli naive Bayes
//!
//! Features are binarized at a fixed threshold and modeled as independent
//! Bernoulli variables per class. Suits the indicator-heavy matrices the
//! preprocessor produces.

use crate::error::{AnomalyError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BernoulliNaiveBayes {
    /// Laplace smoothing strength
    pub alpha: f64,
    /// Binarization threshold; values above it count as 1
    pub binarize: f64,
    /// Per-class log prior
    class_log_prior: HashMap<i64, f64>,
    /// Per-class log P(feature = 1)
    feature_log_prob: HashMap<i64, Array1<f64>>,
    /// Per-class log P(feature = 0)
    feature_log_neg_prob: HashMap<i64, Array1<f64>>,
    classes: Vec<i64>,
}

impl Default for BernoulliNaiveBayes {
    fn default() -> Self {
        Self::new()
    }
}

impl BernoulliNaiveBayes {
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            binarize: 0.0,
            class_log_prior: HashMap::new(),
            feature_log_prob: HashMap::new(),
            feature_log_neg_prob: HashMap::new(),
            classes: Vec::new(),
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha.max(1e-10);
        self
    }

    pub fn with_binarize(mut self, threshold: f64) -> Self {
        self.binarize = threshold;
        self
    }

    fn binarize_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(|v| if v > self.binarize { 1.0 } else { 0.0 })
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(AnomalyError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }

        let xb = self.binarize_matrix(x);

        let mut classes: Vec<i64> = y.iter().copied().collect();
        classes.sort_unstable();
        classes.dedup();
        self.classes = classes;

        self.class_log_prior.clear();
        self.feature_log_prob.clear();
        self.feature_log_neg_prob.clear();

        for &class in &self.classes {
            let members: Vec<usize> = y
                .iter()
                .enumerate()
                .filter(|(_, &label)| label == class)
                .map(|(i, _)| i)
                .collect();
            let n_class = members.len() as f64;

            self.class_log_prior
                .insert(class, (n_class / n_samples as f64).ln());

            let mut ones = Array1::zeros(n_features);
            for &i in &members {
                for j in 0..n_features {
                    ones[j] += xb[[i, j]];
                }
            }

            let log_p = ones.mapv(|c: f64| ((c + self.alpha) / (n_class + 2.0 * self.alpha)).ln());
            let log_q = ones
                .mapv(|c: f64| ((n_class - c + self.alpha) / (n_class + 2.0 * self.alpha)).ln());
            self.feature_log_prob.insert(class, log_p);
            self.feature_log_neg_prob.insert(class, log_q);
        }

        Ok(self)
    }

    fn joint_log_likelihood(&self, x: &Array2<f64>) -> Result<HashMap<i64, Array1<f64>>> {
        if self.classes.is_empty() {
            return Err(AnomalyError::ModelNotFitted);
        }
        let xb = self.binarize_matrix(x);

        let mut jll = HashMap::new();
        for &class in &self.classes {
            let prior = self.class_log_prior[&class];
            let log_p = &self.feature_log_prob[&class];
            let log_q = &self.feature_log_neg_prob[&class];

            // sum_j x_j ln p_j + (1 - x_j) ln q_j
            let scores = xb.dot(&(log_p - log_q)) + log_q.sum() + prior;
            jll.insert(class, scores);
        }
        Ok(jll)
    }

    /// Positive-class posterior probability
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let jll = self.joint_log_likelihood(x)?;
        let n = x.nrows();

        // With a single fitted class the posterior degenerates to that class
        if self.classes.len() < 2 {
            let only = self.classes.first().copied().unwrap_or(0);
            return Ok(Array1::from_elem(n, if only == 1 { 1.0 } else { 0.0 }));
        }

        let neg = &jll[&self.classes[0]];
        let pos = &jll[&self.classes[1]];
        let proba: Vec<f64> = (0..n)
            .map(|i| {
                // Log-sum-exp over the two classes
                let m = neg[i].max(pos[i]);
                let denom = (neg[i] - m).exp() + (pos[i] - m).exp();
                (pos[i] - m).exp() / denom
            })
            .collect();
        Ok(Array1::from_vec(proba))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    /// Log-odds contribution of each feature, normalized to sum to one
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        if self.classes.len() < 2 {
            return None;
        }
        let pos = &self.feature_log_prob[&self.classes[1]];
        let neg = &self.feature_log_prob[&self.classes[0]];
        let mut imp = (pos - neg).mapv(f64::abs);
        let total = imp.sum();
        if total > 0.0 {
            imp /= total;
        }
        Some(imp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn indicator_data() -> (Array2<f64>, Array1<i64>) {
        let x = array![
            [1.0, 0.0, 0.0],
            [1.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 1.0],
            [0.0, 1.0, 0.0],
            [0.0, 1.0, 1.0],
        ];
        let y = array![0i64, 0, 0, 1, 1, 1];
        (x, y)
    }

    #[test]
    fn test_separable_indicators() {
        let (x, y) = indicator_data();
        let mut nb = BernoulliNaiveBayes::new();
        nb.fit(&x, &y).unwrap();

        let preds = nb.predict(&x).unwrap();
        for (p, a) in preds.iter().zip(y.iter()) {
            assert!((p - *a as f64).abs() < 0.5);
        }
    }

    #[test]
    fn test_proba_sums_complementary() {
        let (x, y) = indicator_data();
        let mut nb = BernoulliNaiveBayes::new().with_alpha(0.5);
        nb.fit(&x, &y).unwrap();

        let proba = nb.predict_proba(&x).unwrap();
        for &p in proba.iter() {
            assert!((0.0..=1.0).contains(&p));
        }
        assert!(proba[0] < 0.5);
        assert!(proba[3] > 0.5);
    }

    #[test]
    fn test_binarize_threshold() {
        let x = array![[0.4], [0.6]];
        let nb = BernoulliNaiveBayes::new().with_binarize(0.5);
        let xb = nb.binarize_matrix(&x);
        assert_eq!(xb[[0, 0]], 0.0);
        assert_eq!(xb[[1, 0]], 1.0);
    }

    #[test]
    fn test_smoothing_avoids_zero_probability() {
        // Feature 1 never fires for class 0; smoothing keeps it finite
        let (x, y) = indicator_data();
        let mut nb = BernoulliNaiveBayes::new().with_alpha(0.1);
        nb.fit(&x, &y).unwrap();

        let unseen = array![[0.0, 1.0, 0.0]];
        let proba = nb.predict_proba(&unseen).unwrap();
        assert!(proba[0].is_finite());
    }
}
