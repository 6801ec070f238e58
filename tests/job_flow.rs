//! Job lifecycle around a real training run.

use iot_anomaly_detection::data::{apply_mapping, infer_mapping, MappedTable};
use iot_anomaly_detection::job::{run_job, tracker_for, JobStatus};
use iot_anomaly_detection::training::grid::{floats, ParamGrid};
use iot_anomaly_detection::training::{ModelId, ModelRequest, NestedCvConfig, TrainingRequest};
use polars::prelude::*;

fn small_table() -> MappedTable {
    let n = 80;
    let length: Vec<i64> = (0..n)
        .map(|i| if i % 4 == 0 { 1400 } else { 80 + (i % 40) as i64 })
        .collect();
    let label: Vec<i64> = (0..n).map(|i| if i % 4 == 0 { 1 } else { 0 }).collect();
    let proto: Vec<&str> = (0..n).map(|i| if i % 4 == 0 { "udp" } else { "tcp" }).collect();
    let df = df!(
        "length" => length,
        "proto" => proto,
        "label" => label,
    )
    .unwrap();

    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let mapping = infer_mapping(&names);
    apply_mapping(&df, &mapping, "job-test", 42).unwrap()
}

fn request() -> TrainingRequest {
    TrainingRequest::new(vec![ModelRequest::with_grid(
        ModelId::NaiveBayes,
        ParamGrid::new(vec![("alpha".to_string(), floats(&[0.5, 1.0]))]),
    )])
}

fn config() -> NestedCvConfig {
    NestedCvConfig {
        outer_folds: 3,
        inner_folds: 2,
        rfe_features: 5,
        ..NestedCvConfig::default()
    }
}

#[test]
fn test_completed_job_carries_report_and_full_progress() {
    let table = small_table();
    let request = request();
    let config = config();
    let tracker = tracker_for(&request, &config);

    run_job(&tracker, &table, &request, &config).unwrap();

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress_total, 3);
    assert_eq!(snapshot.progress_done, 3);
    assert!(snapshot.finished_at.is_some());
    assert!(snapshot.error.is_none());

    let report = snapshot.report.expect("completed job must carry a report");
    assert_eq!(report.models.len(), 1);
    assert_eq!(report.leaderboard.len(), 1);
}

#[test]
fn test_cancelled_before_start_fails_with_cancelled() {
    let table = small_table();
    let request = request();
    let config = config();
    let tracker = tracker_for(&request, &config);

    tracker.cancel();
    let result = run_job(&tracker, &table, &request, &config);
    assert!(result.is_err());

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("cancelled"));
    assert!(snapshot.report.is_none());
}

#[test]
fn test_invalid_request_fails_the_job() {
    let table = small_table();
    let request = TrainingRequest::new(vec![ModelRequest::with_grid(
        ModelId::NaiveBayes,
        ParamGrid::new(vec![("nonsense".to_string(), floats(&[1.0]))]),
    )]);
    let config = config();
    let tracker = tracker_for(&request, &config);

    assert!(run_job(&tracker, &table, &request, &config).is_err());
    assert_eq!(tracker.status(), JobStatus::Failed);
    assert!(tracker.snapshot().error.is_some());
}
