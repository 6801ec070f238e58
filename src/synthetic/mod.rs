//! Synthetic sample generation
//!
//! Class balancing for the training partition of each fold. Only SMOTE
//! (Synthetic Minority Over-sampling Technique) is provided; balancing is
//! always seeded so folds are reproducible.

mod smote;

pub use smote::Smote;

use crate::error::Result;
use ndarray::{Array1, Array2};

/// Result of resampling
#[derive(Debug, Clone)]
pub struct ResampleResult {
    /// Resampled features (original rows first, synthetic rows appended)
    pub x: Array2<f64>,
    /// Resampled labels
    pub y: Array1<i64>,
    /// Number of synthetic samples generated per class, in ascending class order
    pub n_synthetic: Vec<usize>,
    /// Set when balancing was skipped (e.g. a single-class partition);
    /// carries the reason for the fold report.
    pub skipped: Option<String>,
}

/// Trait for samplers
pub trait Sampler: Send + Sync {
    /// Fit the sampler on data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<()>;

    /// Resample data
    fn resample(&self, x: &Array2<f64>, y: &Array1<i64>) -> Result<ResampleResult>;

    /// Fit and resample in one step
    fn fit_resample(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<ResampleResult> {
        self.fit(x, y)?;
        self.resample(x, y)
    }
}

/// Get class distribution
pub fn class_counts(y: &Array1<i64>) -> std::collections::HashMap<i64, usize> {
    let mut counts = std::collections::HashMap::new();
    for &label in y.iter() {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

/// Get indices for each class
pub fn class_indices(y: &Array1<i64>) -> std::collections::HashMap<i64, Vec<usize>> {
    let mut indices = std::collections::HashMap::new();
    for (i, &label) in y.iter().enumerate() {
        indices.entry(label).or_insert_with(Vec::new).push(i);
    }
    indices
}
