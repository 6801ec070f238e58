//! Nested cross-validation trainer
//!
//! Outer folds give unbiased scores; inner folds tune hyperparameters. Every
//! fitted stage (preprocessing vocabulary, imputation medians, oversampling,
//! feature elimination) sees only the outer training partition, so nothing
//! about a test row leaks into the model that scores it.

use crate::data::mapping::MappedTable;
use crate::data::{FeaturePreprocessor, MedianImputer, PreprocessConfig};
use crate::error::{AnomalyError, Result};
use crate::metrics::{
    evaluate_fold, pool_confusions, rank_leaderboard, roc_auc, summarize, ConfusionMatrix,
    FoldMetrics, LeaderboardRow, MetricSummary,
};
use crate::selection::RfeSelector;
use crate::synthetic::{Sampler, Smote};
use crate::training::cross_validation::StratifiedKFold;
use crate::training::grid::{ParamGrid, ParamSet};
use crate::training::registry::{Estimator, ModelId};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How many features each model's report lists.
const TOP_FEATURES: usize = 20;

/// Pipeline and search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedCvConfig {
    pub outer_folds: usize,
    pub inner_folds: usize,
    /// Features kept by recursive elimination (capped at the matrix width).
    pub rfe_features: usize,
    pub smote_k_neighbors: usize,
    pub seed: u64,
    pub preprocess: PreprocessConfig,
}

impl Default for NestedCvConfig {
    fn default() -> Self {
        Self {
            outer_folds: 5,
            inner_folds: 5,
            rfe_features: 10,
            smote_k_neighbors: 5,
            seed: 42,
            preprocess: PreprocessConfig::default(),
        }
    }
}

/// One model to evaluate, with an optional grid override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub id: ModelId,
    pub grid: Option<ParamGrid>,
}

impl ModelRequest {
    pub fn new(id: ModelId) -> Self {
        Self { id, grid: None }
    }

    pub fn with_grid(id: ModelId, grid: ParamGrid) -> Self {
        Self {
            id,
            grid: Some(grid),
        }
    }

    fn resolved_grid(&self) -> ParamGrid {
        self.grid.clone().unwrap_or_else(|| self.id.default_grid())
    }
}

/// The evaluation request: models in ranking-relevant order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub models: Vec<ModelRequest>,
}

impl TrainingRequest {
    pub fn new(models: Vec<ModelRequest>) -> Self {
        Self { models }
    }

    /// Synchronous checks run at submission, before any computation.
    pub fn validate(&self, config: &NestedCvConfig) -> Result<()> {
        if self.models.is_empty() {
            return Err(AnomalyError::ConfigError(
                "no models requested".to_string(),
            ));
        }
        let mut seen = Vec::new();
        for request in &self.models {
            if seen.contains(&request.id) {
                return Err(AnomalyError::ConfigError(format!(
                    "model '{}' requested twice",
                    request.id
                )));
            }
            seen.push(request.id);
            if let Some(grid) = &request.grid {
                grid.validate(request.id.recognized_keys(), request.id.as_str())?;
            }
        }
        if config.outer_folds < 2 {
            return Err(AnomalyError::ConfigError(
                "outer_folds must be at least 2".to_string(),
            ));
        }
        if config.inner_folds < 2 {
            return Err(AnomalyError::ConfigError(
                "inner_folds must be at least 2".to_string(),
            ));
        }
        if config.rfe_features == 0 {
            return Err(AnomalyError::ConfigError(
                "rfe_features must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Progress and cancellation hooks, checked at every (fold, model) boundary.
pub trait ProgressSink: Sync {
    fn advance(&self);
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Sink for callers that do not track progress.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn advance(&self) {}
}

/// Outcome of one model on one outer fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FoldStatus {
    Evaluated(FoldMetrics),
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldOutcome {
    pub fold_idx: usize,
    pub status: FoldStatus,
    /// Winning inner-search parameters, when the fold was evaluated.
    pub best_params: Option<ParamSet>,
    /// Mean inner ROC AUC of the winning candidate.
    pub best_inner_auc: Option<f64>,
    /// Held-out predictions, row-aligned with the fold's test partition.
    pub predicted_labels: Option<Vec<i64>>,
    /// Held-out ranking scores, row-aligned with the fold's test partition.
    pub predicted_scores: Option<Vec<f64>>,
    /// Note recorded when oversampling was skipped on this fold.
    pub balancing_note: Option<String>,
}

/// A feature with its cross-fold elimination rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRank {
    pub feature: String,
    /// Mean elimination rank across evaluated folds (1 = always kept).
    pub mean_rank: f64,
    /// Mean model importance across folds, for models that expose one.
    pub importance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub model: ModelId,
    pub folds: Vec<FoldOutcome>,
    pub accuracy: MetricSummary,
    pub precision: MetricSummary,
    pub recall: MetricSummary,
    pub f1: MetricSummary,
    pub roc_auc: Option<MetricSummary>,
    /// Confusion counts pooled over evaluated folds.
    pub confusion: ConfusionMatrix,
    pub top_features: Vec<FeatureRank>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub n_rows: usize,
    pub seed: u64,
    pub models: Vec<ModelReport>,
    pub leaderboard: Vec<LeaderboardRow>,
}

/// Shared per-fold pipeline output, reused by every model on that fold.
struct FoldData {
    fold_idx: usize,
    /// Set when the whole fold cannot be evaluated.
    skip: Option<String>,
    x_train: Array2<f64>,
    y_train: Array1<i64>,
    x_test: Array2<f64>,
    y_test: Array1<i64>,
    /// Post-preprocessing column names.
    feature_names: Vec<String>,
    /// Elimination rank per post-preprocessing column.
    rfe_ranking: Vec<usize>,
    /// Kept column indices, ascending.
    selected: Vec<usize>,
    balancing_note: Option<String>,
}

/// Per-fold output for one model.
struct ModelFoldOutput {
    outcome: FoldOutcome,
    /// (column name, model importance) for the fold's selected features.
    importances: Vec<(String, f64)>,
}

/// Run nested cross-validation for every requested model.
///
/// Dataset-level problems (too few rows, a single class) surface as
/// `DataError` before any fold starts. Per-fold problems are recorded as
/// skipped folds in the report instead of failing the run.
pub fn evaluate_models(
    table: &MappedTable,
    request: &TrainingRequest,
    config: &NestedCvConfig,
    progress: &dyn ProgressSink,
) -> Result<TrainingReport> {
    request.validate(config)?;

    let n_rows = table.n_rows;
    if n_rows < config.outer_folds {
        return Err(AnomalyError::DataError(format!(
            "dataset has {} rows but {} outer folds were requested",
            n_rows, config.outer_folds
        )));
    }
    if table.n_classes() < 2 {
        return Err(AnomalyError::DataError(
            "dataset holds a single class; nothing to separate".to_string(),
        ));
    }

    let y = Array1::from_vec(table.label.clone());
    let splits = StratifiedKFold::new(config.outer_folds, config.seed).split(&y)?;

    // Fold pipelines are independent; run them in parallel. Models within a
    // fold run sequentially so the progress counter moves at (fold, model)
    // granularity.
    let fold_results: Result<Vec<(FoldData, Vec<ModelFoldOutput>)>> = splits
        .par_iter()
        .map(|split| {
            if progress.is_cancelled() {
                return Err(cancelled());
            }
            let fold = prepare_fold(table, &y, split.fold_idx, &split.train_indices,
                &split.test_indices, config);
            let fold = match fold {
                Ok(fold) => fold,
                Err(err) => {
                    // A broken fold pipeline skips the fold, not the run
                    tracing::warn!(fold = split.fold_idx, error = %err, "fold pipeline failed");
                    FoldData {
                        fold_idx: split.fold_idx,
                        skip: Some(format!("pipeline failed: {err}")),
                        x_train: Array2::zeros((0, 0)),
                        y_train: Array1::zeros(0),
                        x_test: Array2::zeros((0, 0)),
                        y_test: Array1::zeros(0),
                        feature_names: Vec::new(),
                        rfe_ranking: Vec::new(),
                        selected: Vec::new(),
                        balancing_note: None,
                    }
                }
            };

            let mut outputs = Vec::with_capacity(request.models.len());
            for model_request in &request.models {
                if progress.is_cancelled() {
                    return Err(cancelled());
                }
                let output = run_model_on_fold(&fold, model_request, config);
                progress.advance();
                outputs.push(output);
            }
            Ok((fold, outputs))
        })
        .collect();
    let fold_results = fold_results?;

    // Aggregate per model, preserving request order.
    let mut models = Vec::with_capacity(request.models.len());
    let mut leaderboard = Vec::with_capacity(request.models.len());

    for (order, model_request) in request.models.iter().enumerate() {
        let mut folds: Vec<FoldOutcome> = fold_results
            .iter()
            .map(|(_, outputs)| outputs[order].outcome.clone())
            .collect();
        folds.sort_by_key(|outcome| outcome.fold_idx);

        let evaluated: Vec<&FoldMetrics> = folds
            .iter()
            .filter_map(|outcome| match &outcome.status {
                FoldStatus::Evaluated(metrics) => Some(metrics),
                FoldStatus::Skipped { .. } => None,
            })
            .collect();

        let collect = |f: fn(&FoldMetrics) -> f64| -> Vec<f64> {
            evaluated.iter().map(|m| f(m)).collect()
        };
        let accuracy = summarize(&collect(|m| m.accuracy));
        let precision = summarize(&collect(|m| m.precision));
        let recall = summarize(&collect(|m| m.recall));
        let f1 = summarize(&collect(|m| m.f1));
        let aucs: Vec<f64> = evaluated.iter().filter_map(|m| m.roc_auc).collect();
        let roc = if aucs.is_empty() {
            None
        } else {
            Some(summarize(&aucs))
        };
        let confusion = pool_confusions(
            &evaluated.iter().map(|m| m.confusion).collect::<Vec<_>>(),
        );

        let top_features = aggregate_features(&fold_results, order);

        // A model with no evaluated folds has no score to report
        let note = if evaluated.is_empty() {
            Some("insufficient data".to_string())
        } else {
            None
        };

        leaderboard.push(LeaderboardRow {
            model: model_request.id.as_str().to_string(),
            evaluated_folds: evaluated.len(),
            accuracy,
            precision,
            recall,
            f1,
            roc_auc: roc,
            confusion,
            note,
            requested_order: order,
        });

        models.push(ModelReport {
            model: model_request.id,
            folds,
            accuracy,
            precision,
            recall,
            f1,
            roc_auc: roc,
            confusion,
            top_features,
        });
    }

    rank_leaderboard(&mut leaderboard);

    Ok(TrainingReport {
        n_rows,
        seed: config.seed,
        models,
        leaderboard,
    })
}

fn cancelled() -> AnomalyError {
    AnomalyError::TrainingError("cancelled".to_string())
}

/// Run the leakage-safe pipeline for one outer fold: fit preprocessing,
/// imputation, oversampling and feature elimination on the training rows
/// only, then project the test rows through the fitted stages.
fn prepare_fold(
    table: &MappedTable,
    y: &Array1<i64>,
    fold_idx: usize,
    train_rows: &[usize],
    test_rows: &[usize],
    config: &NestedCvConfig,
) -> Result<FoldData> {
    let y_train_raw: Array1<i64> = Array1::from_vec(train_rows.iter().map(|&i| y[i]).collect());
    let y_test: Array1<i64> = Array1::from_vec(test_rows.iter().map(|&i| y[i]).collect());

    let classes = y_train_raw.iter().collect::<std::collections::HashSet<_>>();
    if classes.len() < 2 {
        return Ok(FoldData {
            fold_idx,
            skip: Some("skipped: single class in training partition".to_string()),
            x_train: Array2::zeros((0, 0)),
            y_train: Array1::zeros(0),
            x_test: Array2::zeros((0, 0)),
            y_test,
            feature_names: Vec::new(),
            rfe_ranking: Vec::new(),
            selected: Vec::new(),
            balancing_note: None,
        });
    }

    let mut preprocessor = FeaturePreprocessor::new(config.preprocess.clone());
    let x_train_raw = preprocessor.fit_transform(table, train_rows)?;
    let x_test_raw = preprocessor.transform(table, test_rows)?;
    let feature_names: Vec<String> = preprocessor
        .feature_names()
        .map(|names| names.to_vec())
        .unwrap_or_default();

    let mut imputer = MedianImputer::new();
    let x_train_imputed = imputer.fit_transform(&x_train_raw)?;
    let x_test_imputed = imputer.transform(&x_test_raw)?;

    let mut smote = Smote::new(config.seed.wrapping_add(fold_idx as u64))
        .with_k_neighbors(config.smote_k_neighbors);
    let balanced = smote.fit_resample(&x_train_imputed, &y_train_raw)?;

    let mut rfe = RfeSelector::new(config.rfe_features);
    let y_balanced_f64 = balanced.y.mapv(|v| v as f64);
    let x_train = rfe.fit_transform(&balanced.x, &y_balanced_f64)?;
    let x_test = rfe.transform(&x_test_imputed)?;
    let rfe_ranking = rfe.ranking().unwrap_or_default().to_vec();
    let selected = rfe.selected_indices().unwrap_or_default().to_vec();

    Ok(FoldData {
        fold_idx,
        skip: None,
        x_train,
        y_train: balanced.y,
        x_test,
        y_test,
        feature_names,
        rfe_ranking,
        selected,
        balancing_note: balanced.skipped,
    })
}

/// Inner grid search plus outer scoring for one model on one prepared fold.
fn run_model_on_fold(
    fold: &FoldData,
    request: &ModelRequest,
    config: &NestedCvConfig,
) -> ModelFoldOutput {
    let skipped = |reason: String| ModelFoldOutput {
        outcome: FoldOutcome {
            fold_idx: fold.fold_idx,
            status: FoldStatus::Skipped { reason },
            best_params: None,
            best_inner_auc: None,
            predicted_labels: None,
            predicted_scores: None,
            balancing_note: fold.balancing_note.clone(),
        },
        importances: Vec::new(),
    };

    if let Some(reason) = &fold.skip {
        return skipped(reason.clone());
    }

    let grid = request.resolved_grid();
    let candidates = grid.candidates();

    let inner_seed = config.seed.wrapping_add(fold.fold_idx as u64).wrapping_add(1);
    let inner_splits = match StratifiedKFold::new(config.inner_folds, inner_seed)
        .split(&fold.y_train)
    {
        Ok(splits) => splits,
        Err(err) => return skipped(format!("inner split failed: {err}")),
    };

    // Grid search: mean inner ROC AUC, ties broken by lower variance, then
    // by grid declaration order (the iteration order here).
    let mut best: Option<(ParamSet, f64, f64)> = None;
    for candidate in candidates {
        let mut aucs = Vec::with_capacity(inner_splits.len());
        for split in &inner_splits {
            let x_fit = fold.x_train.select(Axis(0), &split.train_indices);
            let y_fit: Array1<i64> = Array1::from_vec(
                split.train_indices.iter().map(|&i| fold.y_train[i]).collect(),
            );
            let x_val = fold.x_train.select(Axis(0), &split.test_indices);
            let y_val: Array1<i64> = Array1::from_vec(
                split.test_indices.iter().map(|&i| fold.y_train[i]).collect(),
            );

            let auc = score_candidate(request.id, &candidate, config.seed, &x_fit, &y_fit,
                &x_val, &y_val);
            match auc {
                Some(auc) => aucs.push(auc),
                // Unscorable validation partition; contributes nothing
                None => {}
            }
        }

        let summary = summarize(&aucs);
        let mean = if aucs.is_empty() { 0.0 } else { summary.mean };
        let var = summary.std * summary.std;

        let better = match &best {
            None => true,
            Some((_, best_mean, best_var)) => {
                mean > *best_mean || (mean == *best_mean && var < *best_var)
            }
        };
        if better {
            best = Some((candidate, mean, var));
        }
    }

    let (best_params, best_inner_auc, _) = match best {
        Some((params, mean, var)) => (params, mean, var),
        None => return skipped("no grid candidates".to_string()),
    };

    // Refit on the full balanced training matrix and score the held-out rows
    let mut model = match request.id.build(&best_params, config.seed) {
        Ok(model) => model,
        Err(err) => return skipped(format!("model construction failed: {err}")),
    };
    if let Err(err) = model.fit(&fold.x_train, &fold.y_train) {
        tracing::warn!(model = %request.id, fold = fold.fold_idx, error = %err,
            "refit failed");
        return skipped(format!("training failed: {err}"));
    }

    let (y_pred, scores) = match (model.predict(&fold.x_test), model.decision_scores(&fold.x_test))
    {
        (Ok(pred), Ok(scores)) => (pred, scores),
        (Err(err), _) | (_, Err(err)) => {
            return skipped(format!("prediction failed: {err}"))
        }
    };

    let metrics = evaluate_fold(&fold.y_test, &y_pred, &scores);

    let importances = model
        .feature_importances()
        .map(|imp| {
            fold.selected
                .iter()
                .zip(imp.iter())
                .filter_map(|(&col, &value)| {
                    fold.feature_names.get(col).map(|name| (name.clone(), value))
                })
                .collect()
        })
        .unwrap_or_default();

    ModelFoldOutput {
        outcome: FoldOutcome {
            fold_idx: fold.fold_idx,
            status: FoldStatus::Evaluated(metrics),
            best_params: Some(best_params),
            best_inner_auc: Some(best_inner_auc),
            predicted_labels: Some(y_pred.to_vec()),
            predicted_scores: Some(scores.to_vec()),
            balancing_note: fold.balancing_note.clone(),
        },
        importances,
    }
}

/// Fit one candidate on an inner training partition and score it by ROC AUC
/// on the inner validation partition. Fit failures score 0.0, the worst
/// possible, so broken configurations lose the search instead of aborting it.
fn score_candidate(
    id: ModelId,
    params: &ParamSet,
    seed: u64,
    x_fit: &Array2<f64>,
    y_fit: &Array1<i64>,
    x_val: &Array2<f64>,
    y_val: &Array1<i64>,
) -> Option<f64> {
    let mut model = match id.build(params, seed) {
        Ok(model) => model,
        Err(err) => {
            tracing::warn!(model = %id, params = %params.describe(), error = %err,
                "candidate construction failed");
            return Some(0.0);
        }
    };
    if let Err(err) = model.fit(x_fit, y_fit) {
        tracing::warn!(model = %id, params = %params.describe(), error = %err,
            "candidate fit failed");
        return Some(0.0);
    }
    let scores = match model.decision_scores(x_val) {
        Ok(scores) => scores,
        Err(err) => {
            tracing::warn!(model = %id, params = %params.describe(), error = %err,
                "candidate scoring failed");
            return Some(0.0);
        }
    };
    // None when the validation partition is single-class
    roc_auc(y_val, &scores)
}

/// Merge per-fold RFE ranks and model importances by feature name and keep
/// the strongest entries.
fn aggregate_features(
    fold_results: &[(FoldData, Vec<ModelFoldOutput>)],
    model_order: usize,
) -> Vec<FeatureRank> {
    let mut ranks: HashMap<String, Vec<usize>> = HashMap::new();
    let mut importances: HashMap<String, Vec<f64>> = HashMap::new();
    // Remember each feature's first appearance for stable tie-breaking
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (fold, outputs) in fold_results {
        if fold.skip.is_some() {
            continue;
        }
        for (col, name) in fold.feature_names.iter().enumerate() {
            if let Some(&rank) = fold.rfe_ranking.get(col) {
                ranks.entry(name.clone()).or_default().push(rank);
                let next = first_seen.len();
                first_seen.entry(name.clone()).or_insert(next);
            }
        }
        for (name, value) in &outputs[model_order].importances {
            importances.entry(name.clone()).or_default().push(*value);
        }
    }

    let mut features: Vec<FeatureRank> = ranks
        .into_iter()
        .map(|(feature, rank_values)| {
            let mean_rank =
                rank_values.iter().sum::<usize>() as f64 / rank_values.len() as f64;
            let importance = importances.get(&feature).map(|values| {
                values.iter().sum::<f64>() / values.len() as f64
            });
            FeatureRank {
                feature,
                mean_rank,
                importance,
            }
        })
        .collect();

    features.sort_by(|a, b| {
        a.mean_rank
            .partial_cmp(&b.mean_rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| first_seen[&a.feature].cmp(&first_seen[&b.feature]))
    });
    features.truncate(TOP_FEATURES);
    features
}
