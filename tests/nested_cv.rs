//! End-to-end nested cross-validation over a synthetic packet capture.

use iot_anomaly_detection::data::{
    apply_mapping, infer_mapping, FeaturePreprocessor, MappedTable, MedianImputer,
    PreprocessConfig, RawColumn,
};
use iot_anomaly_detection::error::AnomalyError;
use iot_anomaly_detection::selection::RfeSelector;
use iot_anomaly_detection::synthetic::{Sampler, Smote};
use iot_anomaly_detection::training::grid::{floats, ints, strs, ParamGrid};
use iot_anomaly_detection::training::{
    evaluate_models, FoldStatus, ModelId, ModelRequest, NestedCvConfig, NullProgress,
    StratifiedKFold, TrainingRequest,
};
use ndarray::Array1;
use polars::prelude::*;

/// A labeled capture with separable classes: attacks are large UDP frames to
/// high ports, benign traffic is small TCP to well-known ports.
fn capture(n_rows: usize) -> DataFrame {
    let mut src_ip = Vec::with_capacity(n_rows);
    let mut dst_ip = Vec::with_capacity(n_rows);
    let mut src_port = Vec::with_capacity(n_rows);
    let mut dst_port = Vec::with_capacity(n_rows);
    let mut proto = Vec::with_capacity(n_rows);
    let mut length = Vec::with_capacity(n_rows);
    let mut timestamp = Vec::with_capacity(n_rows);
    let mut label = Vec::with_capacity(n_rows);

    for i in 0..n_rows {
        let attack = i % 10 < 3;
        src_ip.push(format!("10.0.0.{}", i % 5 + 1));
        dst_ip.push(format!("192.168.1.{}", i % 3 + 1));
        if attack {
            src_port.push(50_000 + (i % 100) as i64);
            dst_port.push(53_000 + (i % 50) as i64);
            proto.push("udp");
            length.push(1400 + (i % 100) as i64);
            timestamp.push(3_600.0 * 3.0 + i as f64);
        } else {
            src_port.push(40_000 + (i % 200) as i64);
            dst_port.push(if i % 2 == 0 { 80 } else { 443 });
            proto.push("tcp");
            length.push(60 + (i % 140) as i64);
            timestamp.push(3_600.0 * 14.0 + i as f64);
        }
        label.push(if attack { 1i64 } else { 0 });
    }

    df!(
        "src_ip" => src_ip,
        "dst_ip" => dst_ip,
        "src_port" => src_port,
        "dst_port" => dst_port,
        "proto" => proto,
        "length" => length,
        "timestamp" => timestamp,
        "label" => label,
    )
    .unwrap()
}

fn mapped(df: &DataFrame) -> MappedTable {
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let mapping = infer_mapping(&names);
    apply_mapping(df, &mapping, "test-capture", 42).unwrap()
}

/// Small grids keep the test fast while still exercising the search.
fn fast_request() -> TrainingRequest {
    TrainingRequest::new(vec![
        ModelRequest::with_grid(
            ModelId::LogisticRegression,
            ParamGrid::new(vec![("C".to_string(), floats(&[0.1, 1.0]))]),
        ),
        ModelRequest::with_grid(
            ModelId::NaiveBayes,
            ParamGrid::new(vec![("alpha".to_string(), floats(&[0.5, 1.0]))]),
        ),
        ModelRequest::with_grid(
            ModelId::RandomForest,
            ParamGrid::new(vec![
                ("n_estimators".to_string(), ints(&[25])),
                ("max_features".to_string(), strs(&["sqrt"])),
            ]),
        ),
    ])
}

fn fast_config() -> NestedCvConfig {
    NestedCvConfig {
        outer_folds: 3,
        inner_folds: 3,
        rfe_features: 8,
        ..NestedCvConfig::default()
    }
}

#[test]
fn test_end_to_end_leaderboard() {
    let table = mapped(&capture(200));
    let request = fast_request();
    let config = fast_config();

    let report = evaluate_models(&table, &request, &config, &NullProgress).unwrap();

    assert_eq!(report.n_rows, 200);
    assert_eq!(report.models.len(), 3);
    assert_eq!(report.leaderboard.len(), 3);

    for model in &report.models {
        assert_eq!(model.folds.len(), config.outer_folds);
        for fold in &model.folds {
            match &fold.status {
                FoldStatus::Evaluated(metrics) => {
                    assert!((0.0..=1.0).contains(&metrics.accuracy));
                    assert!((0.0..=1.0).contains(&metrics.precision));
                    assert!((0.0..=1.0).contains(&metrics.recall));
                    assert!((0.0..=1.0).contains(&metrics.f1));
                    if let Some(auc) = metrics.roc_auc {
                        assert!((0.0..=1.0).contains(&auc));
                    }
                    let total: usize = metrics.confusion.iter().flatten().sum();
                    assert!(total > 0);
                    // One prediction and one ranking score per held-out row
                    assert_eq!(fold.predicted_labels.as_ref().unwrap().len(), total);
                    assert_eq!(fold.predicted_scores.as_ref().unwrap().len(), total);
                }
                FoldStatus::Skipped { reason } => {
                    panic!("unexpected skipped fold: {reason}")
                }
            }
            assert!(fold.best_params.is_some());
        }
        assert!(model.accuracy.std >= 0.0);
        assert!(!model.top_features.is_empty());
        assert!(model.top_features.len() <= 20);
    }

    // The traffic is cleanly separable, so the winner should do well
    let best = &report.leaderboard[0];
    assert!(best.f1.mean > 0.8, "best f1 was {}", best.f1.mean);

    // Leaderboard is sorted best-first by mean F1
    for pair in report.leaderboard.windows(2) {
        assert!(pair[0].f1.mean >= pair[1].f1.mean);
    }
    for row in &report.leaderboard {
        assert_eq!(row.evaluated_folds, config.outer_folds);
        assert!(row.note.is_none());
    }
}

/// A grid whose only candidate cannot be constructed skips every fold, and
/// the leaderboard must say so instead of showing a zero score.
#[test]
fn test_all_folds_skipped_reports_insufficient_data() {
    let table = mapped(&capture(120));
    let request = TrainingRequest::new(vec![
        ModelRequest::with_grid(
            ModelId::NaiveBayes,
            ParamGrid::new(vec![("alpha".to_string(), floats(&[1.0]))]),
        ),
        // "solver" is a recognized key, so submission succeeds, but no
        // lbfgs solver exists and every per-fold build fails.
        ModelRequest::with_grid(
            ModelId::LogisticRegression,
            ParamGrid::new(vec![("solver".to_string(), strs(&["lbfgs"]))]),
        ),
    ]);

    let report = evaluate_models(&table, &request, &fast_config(), &NullProgress).unwrap();

    let broken = report
        .models
        .iter()
        .find(|m| m.model == ModelId::LogisticRegression)
        .unwrap();
    for fold in &broken.folds {
        assert!(matches!(fold.status, FoldStatus::Skipped { .. }));
        assert!(fold.predicted_labels.is_none());
    }

    // The unscored model sinks to the bottom and is flagged, while the
    // healthy model still gets a scored row.
    let last = report.leaderboard.last().unwrap();
    assert_eq!(last.model, "logistic_regression");
    assert_eq!(last.evaluated_folds, 0);
    assert!(last.insufficient_data());
    assert_eq!(last.note.as_deref(), Some("insufficient data"));

    let scored = &report.leaderboard[0];
    assert_eq!(scored.model, "naive_bayes");
    assert!(!scored.insufficient_data());
    assert!(scored.note.is_none());
}

#[test]
fn test_report_is_deterministic_for_a_seed() {
    let table = mapped(&capture(150));
    let request = TrainingRequest::new(vec![ModelRequest::with_grid(
        ModelId::LogisticRegression,
        ParamGrid::new(vec![("C".to_string(), floats(&[0.1, 1.0]))]),
    )]);
    let config = fast_config();

    let a = evaluate_models(&table, &request, &config, &NullProgress).unwrap();
    let b = evaluate_models(&table, &request, &config, &NullProgress).unwrap();

    assert_eq!(a.leaderboard[0].f1.mean, b.leaderboard[0].f1.mean);
    assert_eq!(a.leaderboard[0].accuracy.mean, b.leaderboard[0].accuracy.mean);
    assert_eq!(a.leaderboard[0].confusion, b.leaderboard[0].confusion);
    for (fa, fb) in a.models[0].folds.iter().zip(b.models[0].folds.iter()) {
        assert_eq!(fa.best_params, fb.best_params);
    }
}

#[test]
fn test_single_class_dataset_rejected() {
    let mut table = mapped(&capture(100));
    table.label = vec![0; table.n_rows];

    let result = evaluate_models(&table, &fast_request(), &fast_config(), &NullProgress);
    assert!(matches!(result, Err(AnomalyError::DataError(_))));
}

#[test]
fn test_too_few_rows_rejected() {
    let table = mapped(&capture(4));
    let config = NestedCvConfig {
        outer_folds: 5,
        ..fast_config()
    };
    let result = evaluate_models(&table, &fast_request(), &config, &NullProgress);
    assert!(matches!(result, Err(AnomalyError::DataError(_))));
}

#[test]
fn test_unknown_hyperparameter_rejected_at_submission() {
    let table = mapped(&capture(100));
    let request = TrainingRequest::new(vec![ModelRequest::with_grid(
        ModelId::LogisticRegression,
        ParamGrid::new(vec![("gamma".to_string(), floats(&[0.1]))]),
    )]);
    let result = evaluate_models(&table, &request, &fast_config(), &NullProgress);
    assert!(matches!(result, Err(AnomalyError::ConfigError(_))));
}

#[test]
fn test_duplicate_model_rejected_at_submission() {
    let table = mapped(&capture(100));
    let request = TrainingRequest::new(vec![
        ModelRequest::new(ModelId::NaiveBayes),
        ModelRequest::new(ModelId::NaiveBayes),
    ]);
    let result = evaluate_models(&table, &request, &fast_config(), &NullProgress);
    assert!(matches!(result, Err(AnomalyError::ConfigError(_))));
}

/// Every fitted stage sees only the training rows, so rewriting the held-out
/// rows must not change what was learned.
#[test]
fn test_held_out_rows_do_not_influence_fitted_stages() {
    let table = mapped(&capture(150));
    let y = Array1::from_vec(table.label.clone());
    let split = StratifiedKFold::new(3, 42).split(&y).unwrap().remove(0);

    let fit_stages = |table: &MappedTable| {
        let mut prep = FeaturePreprocessor::new(PreprocessConfig::default());
        let x_train = prep.fit_transform(table, &split.train_indices).unwrap();
        let mut imputer = MedianImputer::new();
        let x_train = imputer.fit_transform(&x_train).unwrap();
        let y_train: Array1<i64> = Array1::from_vec(
            split.train_indices.iter().map(|&i| table.label[i]).collect(),
        );
        let mut smote = Smote::new(42);
        let balanced = smote.fit_resample(&x_train, &y_train).unwrap();
        let mut rfe = RfeSelector::new(8);
        rfe.fit(&balanced.x, &balanced.y.mapv(|v| v as f64)).unwrap();
        (
            prep.feature_names().unwrap().to_vec(),
            imputer.medians().unwrap().to_vec(),
            rfe.selected_indices().unwrap().to_vec(),
            rfe.ranking().unwrap().to_vec(),
        )
    };

    let baseline = fit_stages(&table);

    // Corrupt every held-out row: lengths, protocol, and label.
    let mut corrupted = table.clone();
    for (name, column) in corrupted.columns.iter_mut() {
        match column {
            RawColumn::Numeric(values) if name.as_str() == "frame.len" => {
                for &i in &split.test_indices {
                    values[i] = Some(99_999.0);
                }
            }
            RawColumn::Text(values) if name.as_str() == "protocol" => {
                for &i in &split.test_indices {
                    values[i] = Some("icmp".to_string());
                }
            }
            _ => {}
        }
    }
    for &i in &split.test_indices {
        corrupted.label[i] = 1 - corrupted.label[i];
    }

    let perturbed = fit_stages(&corrupted);
    assert_eq!(baseline, perturbed);
}

#[test]
fn test_leaderboard_tie_falls_back_to_request_order() {
    // Perfectly separable data pushes several models to identical scores, so
    // ties among them must respect submission order.
    let table = mapped(&capture(200));
    let request = TrainingRequest::new(vec![
        ModelRequest::with_grid(
            ModelId::NaiveBayes,
            ParamGrid::new(vec![("alpha".to_string(), floats(&[1.0]))]),
        ),
        ModelRequest::with_grid(
            ModelId::LogisticRegression,
            ParamGrid::new(vec![("C".to_string(), floats(&[1.0]))]),
        ),
    ]);
    let report = evaluate_models(&table, &request, &fast_config(), &NullProgress).unwrap();

    let tied = report.leaderboard[0].f1.mean == report.leaderboard[1].f1.mean
        && report.leaderboard[0].accuracy.mean == report.leaderboard[1].accuracy.mean;
    if tied {
        assert_eq!(report.leaderboard[0].model, "naive_bayes");
    }
}
