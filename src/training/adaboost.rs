//! AdaBoost (Adaptive Boosting) implementation
//!
//! Binary AdaBoost over decision stumps. Labels are mapped to the {-1, +1}
//! margin space internally; the signed ensemble margin doubles as the
//! ranking score.

use crate::error::{AnomalyError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// A single decision stump: splits on one feature at one threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stump {
    feature_index: usize,
    threshold: f64,
    /// +1.0 when samples at or below the threshold are positive, -1.0 when
    /// the polarity is flipped
    polarity: f64,
}

impl Stump {
    fn predict_sample(&self, sample: &[f64]) -> f64 {
        if sample[self.feature_index] <= self.threshold {
            self.polarity
        } else {
            -self.polarity
        }
    }
}

/// AdaBoost binary classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaBoost {
    pub n_estimators: usize,
    pub learning_rate: f64,
    stumps: Vec<Stump>,
    alphas: Vec<f64>,
    n_features: usize,
    is_fitted: bool,
}

impl Default for AdaBoost {
    fn default() -> Self {
        Self::new(50, 1.0)
    }
}

impl AdaBoost {
    pub fn new(n_estimators: usize, learning_rate: f64) -> Self {
        Self {
            n_estimators,
            learning_rate,
            stumps: Vec::new(),
            alphas: Vec::new(),
            n_features: 0,
            is_fitted: false,
        }
    }

    /// Find the stump minimizing the weighted error
    fn fit_stump(x: &Array2<f64>, y_signed: &[f64], weights: &Array1<f64>) -> Stump {
        let n_features = x.ncols();
        let n_samples = x.nrows();

        let mut best_stump = Stump {
            feature_index: 0,
            threshold: 0.0,
            polarity: 1.0,
        };
        let mut best_error = f64::MAX;

        for f in 0..n_features {
            let col = x.column(f);
            let mut vals: Vec<f64> = col.to_vec();
            vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            vals.dedup();

            for w in vals.windows(2) {
                let threshold = (w[0] + w[1]) / 2.0;

                for &polarity in &[1.0, -1.0] {
                    let mut error = 0.0;
                    for i in 0..n_samples {
                        let pred = if col[i] <= threshold { polarity } else { -polarity };
                        if pred != y_signed[i] {
                            error += weights[i];
                        }
                    }
                    if error < best_error {
                        best_error = error;
                        best_stump = Stump {
                            feature_index: f,
                            threshold,
                            polarity,
                        };
                    }
                }
            }
        }
        best_stump
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(AnomalyError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }

        self.n_features = x.ncols();
        let y_signed: Vec<f64> = y.iter().map(|&v| if v > 0.5 { 1.0 } else { -1.0 }).collect();
        let mut weights = Array1::from_elem(n_samples, 1.0 / n_samples as f64);

        self.stumps.clear();
        self.alphas.clear();

        for _round in 0..self.n_estimators {
            let stump = Self::fit_stump(x, &y_signed, &weights);

            let predictions: Vec<f64> = (0..n_samples)
                .map(|i| stump.predict_sample(&x.row(i).to_vec()))
                .collect();

            let mut error = 0.0;
            for i in 0..n_samples {
                if predictions[i] != y_signed[i] {
                    error += weights[i];
                }
            }
            error = error.clamp(1e-15, 1.0 - 1e-15);

            let alpha = 0.5 * self.learning_rate * ((1.0 - error) / error).ln();

            // Reweight: misclassified up, correct down
            for i in 0..n_samples {
                weights[i] *= (-alpha * y_signed[i] * predictions[i]).exp();
            }
            let w_sum = weights.sum();
            if w_sum > 0.0 {
                weights /= w_sum;
            }

            self.stumps.push(stump);
            self.alphas.push(alpha);

            // A perfect stump leaves nothing to boost
            if error <= 1e-14 {
                break;
            }
        }

        self.is_fitted = true;
        Ok(self)
    }

    /// Signed ensemble margin; positive means the anomalous class
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.is_fitted {
            return Err(AnomalyError::ModelNotFitted);
        }

        let margins: Vec<f64> = (0..x.nrows())
            .map(|i| {
                let sample = x.row(i).to_vec();
                self.stumps
                    .iter()
                    .zip(self.alphas.iter())
                    .map(|(stump, &alpha)| alpha * stump.predict_sample(&sample))
                    .sum()
            })
            .collect();
        Ok(Array1::from_vec(margins))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let margins = self.decision_function(x)?;
        Ok(margins.mapv(|m| if m >= 0.0 { 1.0 } else { 0.0 }))
    }

    /// Alpha-weighted stump feature usage
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        if !self.is_fitted || self.n_features == 0 {
            return None;
        }
        let mut importances = vec![0.0f64; self.n_features];
        for (stump, &alpha) in self.stumps.iter().zip(self.alphas.iter()) {
            importances[stump.feature_index] += alpha.abs();
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in importances.iter_mut() {
                *v /= total;
            }
        }
        Some(Array1::from_vec(importances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_adaboost_binary() {
        let x = array![
            [1.0, 2.0],
            [2.0, 3.0],
            [3.0, 4.0],
            [6.0, 7.0],
            [7.0, 8.0],
            [8.0, 9.0],
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut model = AdaBoost::new(10, 1.0);
        model.fit(&x, &y).unwrap();

        let preds = model.predict(&x).unwrap();
        let acc = preds
            .iter()
            .zip(y.iter())
            .filter(|(p, a)| (*p - *a).abs() < 0.5)
            .count() as f64
            / y.len() as f64;
        assert!(acc >= 0.8, "accuracy = {}", acc);
    }

    #[test]
    fn test_margins_separate_classes() {
        let x = array![[0.0], [1.0], [5.0], [6.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut model = AdaBoost::new(20, 1.0);
        model.fit(&x, &y).unwrap();

        let margins = model.decision_function(&x).unwrap();
        assert!(margins[0] < margins[2]);
        assert!(margins[1] < margins[3]);
    }

    #[test]
    fn test_feature_importances_sum_to_one() {
        let x = array![[0.0, 9.0], [1.0, 8.0], [5.0, 9.5], [6.0, 8.5]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut model = AdaBoost::new(5, 1.0);
        model.fit(&x, &y).unwrap();

        let imp = model.feature_importances().unwrap();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
