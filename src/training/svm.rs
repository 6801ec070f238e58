//! Linear support vector machine
//!
//! Full-batch subgradient descent on the regularized hinge objective. Only
//! the linear kernel is provided; the signed margin is the ranking score.

use super::linear_models::Standardizer;
use crate::error::{AnomalyError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Hinge variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SvmLoss {
    Hinge,
    SquaredHinge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvm {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    /// Inverse regularization strength
    pub c: f64,
    pub loss: SvmLoss,
    pub max_iter: usize,
    pub tol: f64,
    pub learning_rate: f64,
    scaler: Option<Standardizer>,
}

impl Default for LinearSvm {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSvm {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            c: 1.0,
            loss: SvmLoss::SquaredHinge,
            max_iter: 1000,
            tol: 1e-6,
            learning_rate: 0.1,
            scaler: None,
        }
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c.max(1e-6);
        self
    }

    pub fn with_loss(mut self, loss: SvmLoss) -> Self {
        self.loss = loss;
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

        let scaler = Standardizer::fit(x);
        let xs = scaler.transform(x);

        // Margin-space labels
        let y_signed: Array1<f64> = y.mapv(|v| if v > 0.5 { 1.0 } else { -1.0 });

        let mut weights: Array1<f64> = Array1::zeros(n_features);
        let mut bias = 0.0;

        let lr = self.learning_rate;
        let lambda = 1.0 / (self.c * n_samples as f64);

        for _iter in 0..self.max_iter {
            let margins = (xs.dot(&weights) + bias) * &y_signed;

            let mut dw: Array1<f64> = lambda * &weights;
            let mut db = 0.0;

            for i in 0..n_samples {
                let m = margins[i];
                if m >= 1.0 {
                    continue;
                }
                // Subgradient of the (squared) hinge at sample i
                let scale = match self.loss {
                    SvmLoss::Hinge => 1.0,
                    SvmLoss::SquaredHinge => 2.0 * (1.0 - m),
                };
                let factor = scale * y_signed[i] / n_samples as f64;
                dw.scaled_add(-factor, &xs.row(i));
                db -= factor;
            }

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

    /// Signed distance to the separating hyperplane
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self
            .coefficients
            .as_ref()
            .ok_or(AnomalyError::ModelNotFitted)?;
        let intercept = self.intercept.unwrap_or(0.0);
        let xs = self.scaler.as_ref().unwrap().transform(x);
        Ok(xs.dot(coefficients) + intercept)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let margins = self.decision_function(x)?;
        Ok(margins.mapv(|m| if m >= 0.0 { 1.0 } else { 0.0 }))
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
    fn test_svm_separable() {
        let (x, y) = separable_data();
        let mut model = LinearSvm::new().with_c(1.0);
        model.fit(&x, &y).unwrap();

        let preds = model.predict(&x).unwrap();
        for (p, a) in preds.iter().zip(y.iter()) {
            assert!((p - a).abs() < 0.5);
        }
    }

    #[test]
    fn test_hinge_variant_also_separates() {
        let (x, y) = separable_data();
        let mut model = LinearSvm::new().with_loss(SvmLoss::Hinge);
        model.fit(&x, &y).unwrap();

        let margins = model.decision_function(&x).unwrap();
        assert!(margins[0] < margins[3]);
    }

    #[test]
    fn test_unfitted_errors() {
        let model = LinearSvm::new();
        assert!(model.decision_function(&array![[0.0]]).is_err());
    }
}
