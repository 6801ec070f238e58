//! Median imputation for numeric feature matrices.

use crate::error::{AnomalyError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Replaces NaN cells with the per-column median learned at fit time.
/// Columns that are entirely NaN impute to 0.0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedianImputer {
    medians: Option<Vec<f64>>,
}

impl MedianImputer {
    pub fn new() -> Self {
        Self { medians: None }
    }

    /// Fitted per-column medians.
    pub fn medians(&self) -> Option<&[f64]> {
        self.medians.as_deref()
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let mut medians = Vec::with_capacity(x.ncols());
        for col in x.columns() {
            let mut present: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
            if present.is_empty() {
                medians.push(0.0);
                continue;
            }
            present.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = present.len() / 2;
            let median = if present.len() % 2 == 0 {
                (present[mid - 1] + present[mid]) / 2.0
            } else {
                present[mid]
            };
            medians.push(median);
        }
        self.medians = Some(medians);
        Ok(())
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let medians = self
            .medians
            .as_ref()
            .ok_or_else(|| AnomalyError::PreprocessingError("imputer not fitted".to_string()))?;
        if medians.len() != x.ncols() {
            return Err(AnomalyError::ShapeError {
                expected: format!("{} columns", medians.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        let mut out = x.clone();
        for (j, &median) in medians.iter().enumerate() {
            for v in out.column_mut(j) {
                if v.is_nan() {
                    *v = median;
                }
            }
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }
}
