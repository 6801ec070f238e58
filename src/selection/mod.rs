//! Recursive feature elimination
//!
//! Repeatedly fits a decision tree and drops the least-important features,
//! 10% of the remaining set per round, until the requested count is left.
//! The requested count is capped at the available feature count rather than
//! failing on narrow matrices.

use crate::error::{AnomalyError, Result};
use crate::training::decision_tree::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Fraction of the remaining features eliminated per round.
const STEP_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfeSelector {
    /// Number of features to keep (capped at the matrix width at fit time)
    pub n_features_to_select: usize,
    /// Kept columns, as original column indices in ascending order
    selected: Option<Vec<usize>>,
    /// Full elimination ranking: 1 for kept columns, 2 for the last batch
    /// eliminated, and so on
    ranking: Option<Vec<usize>>,
}

impl RfeSelector {
    pub fn new(n_features_to_select: usize) -> Self {
        Self {
            n_features_to_select: n_features_to_select.max(1),
            selected: None,
            ranking: None,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_features = x.ncols();
        if n_features == 0 {
            return Err(AnomalyError::PreprocessingError(
                "cannot select features from an empty matrix".to_string(),
            ));
        }

        let target = self.n_features_to_select.min(n_features);

        let mut remaining: Vec<usize> = (0..n_features).collect();
        let mut ranking = vec![1usize; n_features];
        // Batches are recorded in elimination order, then ranked backwards so
        // the last-eliminated batch ranks closest to the survivors.
        let mut eliminated_batches: Vec<Vec<usize>> = Vec::new();

        while remaining.len() > target {
            let x_sub = x.select(Axis(1), &remaining);
            let mut tree = DecisionTree::new_classifier();
            tree.fit(&x_sub, y)?;
            let importances = tree
                .feature_importances()
                .ok_or(AnomalyError::ModelNotFitted)?;

            let step = ((remaining.len() as f64 * STEP_FRACTION).ceil() as usize)
                .max(1)
                .min(remaining.len() - target);

            // Lowest importance goes first; ties resolve by original column
            // order, matching a stable argsort
            let mut order: Vec<usize> = (0..remaining.len()).collect();
            order.sort_by(|&a, &b| {
                importances[a]
                    .partial_cmp(&importances[b])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(remaining[a].cmp(&remaining[b]))
            });

            let mut batch: Vec<usize> = order[..step].iter().map(|&p| remaining[p]).collect();
            batch.sort_unstable();
            remaining.retain(|idx| !batch.contains(idx));
            eliminated_batches.push(batch);
        }

        for (round, batch) in eliminated_batches.iter().rev().enumerate() {
            for &idx in batch {
                ranking[idx] = round + 2;
            }
        }

        self.selected = Some(remaining);
        self.ranking = Some(ranking);
        Ok(())
    }

    /// Keep only the selected columns
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| AnomalyError::PreprocessingError("selector not fitted".to_string()))?;
        Ok(x.select(Axis(1), selected))
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array2<f64>> {
        self.fit(x, y)?;
        self.transform(x)
    }

    /// Original indices of the kept columns, ascending
    pub fn selected_indices(&self) -> Option<&[usize]> {
        self.selected.as_deref()
    }

    /// Elimination rank per original column (1 = kept)
    pub fn ranking(&self) -> Option<&[usize]> {
        self.ranking.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Two informative columns (0 and 2), the rest constant noise.
    fn informative_data() -> (Array2<f64>, Array1<f64>) {
        let n = 40;
        let mut data = Vec::with_capacity(n * 5);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let class = (i % 2) as f64;
            data.push(class * 10.0 + (i % 3) as f64 * 0.1);
            data.push(0.5);
            data.push(class * -5.0 + (i % 4) as f64 * 0.1);
            data.push(1.0);
            data.push(0.0);
            labels.push(class);
        }
        (
            Array2::from_shape_vec((n, 5), data).unwrap(),
            Array1::from_vec(labels),
        )
    }

    #[test]
    fn test_keeps_informative_columns() {
        let (x, y) = informative_data();
        let mut rfe = RfeSelector::new(2);
        let reduced = rfe.fit_transform(&x, &y).unwrap();

        assert_eq!(reduced.ncols(), 2);
        let selected = rfe.selected_indices().unwrap();
        assert!(selected.contains(&0) || selected.contains(&2));
    }

    #[test]
    fn test_requesting_all_is_identity() {
        let (x, y) = informative_data();
        let mut rfe = RfeSelector::new(5);
        rfe.fit(&x, &y).unwrap();

        assert_eq!(rfe.selected_indices().unwrap(), &[0, 1, 2, 3, 4]);
        assert!(rfe.ranking().unwrap().iter().all(|&r| r == 1));
    }

    #[test]
    fn test_request_above_width_is_capped() {
        let (x, y) = informative_data();
        let mut rfe = RfeSelector::new(50);
        let reduced = rfe.fit_transform(&x, &y).unwrap();
        assert_eq!(reduced.ncols(), 5);
    }

    #[test]
    fn test_ranking_covers_every_column() {
        let (x, y) = informative_data();
        let mut rfe = RfeSelector::new(2);
        rfe.fit(&x, &y).unwrap();

        let ranking = rfe.ranking().unwrap();
        assert_eq!(ranking.len(), 5);
        let kept = ranking.iter().filter(|&&r| r == 1).count();
        assert_eq!(kept, 2);
        // Eliminated columns rank strictly above the kept ones
        assert!(ranking.iter().all(|&r| r >= 1));
        assert!(ranking.iter().any(|&r| r > 1));
    }

    #[test]
    fn test_transform_selects_in_original_order() {
        let (x, y) = informative_data();
        let mut rfe = RfeSelector::new(3);
        rfe.fit(&x, &y).unwrap();

        let selected = rfe.selected_indices().unwrap();
        let mut sorted = selected.to_vec();
        sorted.sort_unstable();
        assert_eq!(selected, sorted.as_slice());
    }
}
