//! IoT network anomaly detection
//!
//! Turns labeled packet captures into benchmarked binary classifiers. The
//! pipeline maps raw capture columns onto a canonical schema, engineers flow
//! and protocol features, and evaluates a fixed set of models under nested
//! stratified cross-validation: inner folds tune hyperparameters by ROC AUC,
//! outer folds produce the unbiased leaderboard. Every fitted stage, from
//! one-hot vocabularies to oversampling and feature elimination, sees only
//! the training side of each split.
//!
//! ```no_run
//! use iot_anomaly_detection::data::{apply_mapping, infer_mapping};
//! use iot_anomaly_detection::job::{run_job, tracker_for};
//! use iot_anomaly_detection::training::{ModelId, ModelRequest, NestedCvConfig, TrainingRequest};
//! use polars::prelude::*;
//!
//! # fn main() -> iot_anomaly_detection::Result<()> {
//! let df = CsvReadOptions::default()
//!     .try_into_reader_with_file_path(Some("capture.csv".into()))?
//!     .finish()?;
//! let names: Vec<String> = df.get_column_names().into_iter().map(|s| s.to_string()).collect();
//! let mapping = infer_mapping(&names);
//! let table = apply_mapping(&df, &mapping, "capture.csv", 42)?;
//!
//! let request = TrainingRequest::new(vec![
//!     ModelRequest::new(ModelId::RandomForest),
//!     ModelRequest::new(ModelId::LogisticRegression),
//! ]);
//! let config = NestedCvConfig::default();
//! let tracker = tracker_for(&request, &config);
//! run_job(&tracker, &table, &request, &config)?;
//!
//! for row in &tracker.snapshot().report.unwrap().leaderboard {
//!     println!("{}: f1 {:.3} ± {:.3}", row.model, row.f1.mean, row.f1.std);
//! }
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod error;
pub mod job;
pub mod metrics;
pub mod selection;
pub mod synthetic;
pub mod training;

pub use error::{AnomalyError, Result};
pub use job::{JobStatus, JobTracker, TrainingJob};
pub use metrics::{FoldMetrics, LeaderboardRow, MetricSummary};
pub use training::{
    evaluate_models, ModelId, ModelRequest, NestedCvConfig, TrainingReport, TrainingRequest,
};
