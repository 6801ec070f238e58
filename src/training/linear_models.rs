//! Linear model implementations

use crate::error::{AnomalyError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Per-column standardization fitted on the training matrix. Linear models
/// trained by gradient descent need comparable feature scales; the raw
/// pipeline features mix indicators with byte counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Standardizer {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl Standardizer {
    pub(crate) fn fit(x: &Array2<f64>) -> Self {
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let std = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        Self { mean, std }
    }

    pub(crate) fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            row -= &self.mean;
            row /= &self.std;
        }
        out
    }
}

/// Logistic regression for binary classification, trained by full-batch
/// gradient descent with L2 regularization (strength 1/C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Fitted coefficients
    pub coefficients: Option<Array1<f64>>,
    /// Fitted intercept
    pub intercept: Option<f64>,
    /// Inverse regularization strength
    pub c: f64,
    /// Maximum iterations
    pub max_iter: usize,
    /// Convergence tolerance
    pub tol: f64,
    /// Learning rate
    pub learning_rate: f64,
    scaler: Option<Standardizer>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            c: 1.0,
            max_iter: 1000,
            tol: 1e-6,
            learning_rate: 0.1,
            scaler: None,
        }
    }

    /// Set inverse regularization strength
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c.max(1e-6);
        self
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    fn sigmoid(z: &Array1<f64>) -> Array1<f64> {
        z.mapv(|v| 1.0 / (1.0 + (-v).exp()))
    }

    /// Fit the model using gradient descent
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(AnomalyError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }

        let scaler = Standardizer::fit(x);
        let xs = scaler.transform(x);

        let mut weights: Array1<f64> = Array1::zeros(n_features);
        let mut bias = 0.0;

        let lr = self.learning_rate;
        let alpha = 1.0 / (self.c * n_samples as f64);

        for _iter in 0..self.max_iter {
            let linear = xs.dot(&weights) + bias;
            let predictions = Self::sigmoid(&linear);

            let errors = &predictions - y;
            let dw = (xs.t().dot(&errors) / n_samples as f64) + alpha * &weights;
            let db = errors.mean().unwrap_or(0.0);

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights = weights - lr * &dw;
            bias -= lr * db;
        }

        self.coefficients = Some(weights);
        self.intercept = Some(bias);
        self.scaler = Some(scaler);

        Ok(self)
    }

    /// Predict probabilities for the positive class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self
            .coefficients
            .as_ref()
            .ok_or(AnomalyError::ModelNotFitted)?;
        let intercept = self.intercept.unwrap_or(0.0);
        let xs = self.scaler.as_ref().unwrap().transform(x);

        let linear = xs.dot(coefficients) + intercept;
        Ok(Self::sigmoid(&linear))
    }

    /// Predict class labels
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    /// Absolute coefficient magnitudes, normalized
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        let coef = self.coefficients.as_ref()?;
        let mut imp = coef.mapv(f64::abs);
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

    fn separable_data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 0.2],
            [0.5, 0.1],
            [0.3, 0.4],
            [5.0, 5.2],
            [5.5, 5.1],
            [5.3, 5.4],
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_logistic_separable() {
        let (x, y) = separable_data();
        let mut model = LogisticRegression::new().with_c(1.0);
        model.fit(&x, &y).unwrap();

        let preds = model.predict(&x).unwrap();
        for (p, a) in preds.iter().zip(y.iter()) {
            assert!((p - a).abs() < 0.5);
        }
    }

    #[test]
    fn test_proba_ordering() {
        let (x, y) = separable_data();
        let mut model = LogisticRegression::new();
        model.fit(&x, &y).unwrap();

        let proba = model.predict_proba(&x).unwrap();
        // Positive samples should score above negatives
        assert!(proba[3] > proba[0]);
        assert!(proba[4] > proba[1]);
    }

    #[test]
    fn test_stronger_regularization_shrinks_weights() {
        let (x, y) = separable_data();
        let mut weak = LogisticRegression::new().with_c(10.0);
        let mut strong = LogisticRegression::new().with_c(0.001);
        weak.fit(&x, &y).unwrap();
        strong.fit(&x, &y).unwrap();

        let norm = |m: &LogisticRegression| {
            m.coefficients
                .as_ref()
                .unwrap()
                .mapv(|v| v * v)
                .sum()
                .sqrt()
        };
        assert!(norm(&strong) <= norm(&weak));
    }

    #[test]
    fn test_unfitted_errors() {
        let model = LogisticRegression::new();
        assert!(model.predict(&array![[0.0]]).is_err());
    }
}
