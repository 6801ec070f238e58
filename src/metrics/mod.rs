//! Evaluation metrics and cross-fold aggregation

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Confusion matrix in [[TN, FP], [FN, TP]] layout.
pub type ConfusionMatrix = [[usize; 2]; 2];

/// Mean and sample standard deviation of a metric across folds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
}

/// Metrics for a single evaluated fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// None when the test partition holds a single class.
    pub roc_auc: Option<f64>,
    pub confusion: ConfusionMatrix,
}

pub fn confusion_matrix(y_true: &Array1<i64>, y_pred: &Array1<i64>) -> ConfusionMatrix {
    let mut m = [[0usize; 2]; 2];
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        let row = if t > 0 { 1 } else { 0 };
        let col = if p > 0 { 1 } else { 0 };
        m[row][col] += 1;
    }
    m
}

pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    let correct = cm[0][0] + cm[1][1];
    let total = correct + cm[0][1] + cm[1][0];
    if total == 0 {
        return 0.0;
    }
    correct as f64 / total as f64
}

/// Positive-class precision; 0 when nothing was predicted positive.
pub fn precision(cm: &ConfusionMatrix) -> f64 {
    let tp = cm[1][1];
    let fp = cm[0][1];
    if tp + fp == 0 {
        return 0.0;
    }
    tp as f64 / (tp + fp) as f64
}

/// Positive-class recall; 0 when no positives exist.
pub fn recall(cm: &ConfusionMatrix) -> f64 {
    let tp = cm[1][1];
    let fn_ = cm[1][0];
    if tp + fn_ == 0 {
        return 0.0;
    }
    tp as f64 / (tp + fn_) as f64
}

pub fn f1_score(cm: &ConfusionMatrix) -> f64 {
    let p = precision(cm);
    let r = recall(cm);
    if p + r == 0.0 {
        return 0.0;
    }
    2.0 * p * r / (p + r)
}

/// Rank-based ROC AUC (equivalent to the Mann-Whitney U statistic). Tied
/// scores receive their average rank. Returns None when the labels hold a
/// single class, where the curve is undefined.
pub fn roc_auc(y_true: &Array1<i64>, scores: &Array1<f64>) -> Option<f64> {
    let n = y_true.len();
    let n_pos = y_true.iter().filter(|&&t| t > 0).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    // Average ranks for tied scores
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; the tied block shares the average
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(ranks.iter())
        .filter(|(&t, _)| t > 0)
        .map(|(_, &r)| r)
        .sum();

    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}

/// Mean and sample standard deviation (ddof = 1). Fewer than two values
/// report std 0 rather than NaN.
pub fn summarize(values: &[f64]) -> MetricSummary {
    if values.is_empty() {
        return MetricSummary { mean: 0.0, std: 0.0 };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() < 2 {
        0.0
    } else {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    };
    MetricSummary { mean, std }
}

/// Element-wise sum of per-fold confusion matrices.
pub fn pool_confusions(confusions: &[ConfusionMatrix]) -> ConfusionMatrix {
    let mut pooled = [[0usize; 2]; 2];
    for cm in confusions {
        for r in 0..2 {
            for c in 0..2 {
                pooled[r][c] += cm[r][c];
            }
        }
    }
    pooled
}

/// Compute all fold metrics at once from labels, predictions and ranking
/// scores.
pub fn evaluate_fold(
    y_true: &Array1<i64>,
    y_pred: &Array1<i64>,
    scores: &Array1<f64>,
) -> FoldMetrics {
    let cm = confusion_matrix(y_true, y_pred);
    FoldMetrics {
        accuracy: accuracy(&cm),
        precision: precision(&cm),
        recall: recall(&cm),
        f1: f1_score(&cm),
        roc_auc: roc_auc(y_true, scores),
        confusion: cm,
    }
}

/// One leaderboard entry per model, already aggregated across folds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub model: String,
    /// Folds that contributed scores. Zero means every fold was skipped and
    /// the summaries below are placeholders, not measurements.
    pub evaluated_folds: usize,
    pub accuracy: MetricSummary,
    pub precision: MetricSummary,
    pub recall: MetricSummary,
    pub f1: MetricSummary,
    pub roc_auc: Option<MetricSummary>,
    pub confusion: ConfusionMatrix,
    /// Set to "insufficient data" when no fold could be evaluated.
    pub note: Option<String>,
    /// Position of the model in the submitted request, the final tie-breaker.
    pub requested_order: usize,
}

impl LeaderboardRow {
    /// True when the row carries no real score.
    pub fn insufficient_data(&self) -> bool {
        self.evaluated_folds == 0
    }
}

/// Sort rows best-first: F1 mean, then accuracy mean, then request order.
/// Rows without a single evaluated fold have no score to rank and sink
/// below every scored row.
pub fn rank_leaderboard(rows: &mut [LeaderboardRow]) {
    rows.sort_by(|a, b| {
        a.insufficient_data()
            .cmp(&b.insufficient_data())
            .then(
                b.f1.mean
                    .partial_cmp(&a.f1.mean)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(
                b.accuracy
                    .mean
                    .partial_cmp(&a.accuracy.mean)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.requested_order.cmp(&b.requested_order))
    });
}
