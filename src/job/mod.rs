//! Asynchronous job tracking
//!
//! A training run can take minutes; callers submit it, poll a snapshot, and
//! may cancel. The tracker is cheaply cloneable and safe to share with the
//! thread doing the work.

use crate::data::mapping::MappedTable;
use crate::error::{AnomalyError, Result};
use crate::training::trainer::{
    evaluate_models, NestedCvConfig, ProgressSink, TrainingReport, TrainingRequest,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Point-in-time view of a job, safe to serialize for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress_done: usize,
    pub progress_total: usize,
    pub report: Option<TrainingReport>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    report: Option<TrainingReport>,
    error: Option<String>,
}

#[derive(Debug)]
struct TrackerInner {
    id: Uuid,
    created_at: DateTime<Utc>,
    state: RwLock<JobState>,
    done: AtomicUsize,
    total: AtomicUsize,
    cancelled: AtomicBool,
}

/// Shared handle to one training job.
#[derive(Debug, Clone)]
pub struct JobTracker {
    inner: Arc<TrackerInner>,
}

impl JobTracker {
    pub fn new(total_steps: usize) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                state: RwLock::new(JobState {
                    status: JobStatus::Pending,
                    message: None,
                    started_at: None,
                    finished_at: None,
                    report: None,
                    error: None,
                }),
                done: AtomicUsize::new(0),
                total: AtomicUsize::new(total_steps),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn start(&self) {
        let mut state = self.inner.state.write();
        state.status = JobStatus::Running;
        state.started_at = Some(Utc::now());
    }

    pub fn complete(&self, report: TrainingReport) {
        let mut state = self.inner.state.write();
        state.status = JobStatus::Completed;
        state.finished_at = Some(Utc::now());
        state.report = Some(report);
    }

    pub fn fail(&self, error: String) {
        let mut state = self.inner.state.write();
        state.status = JobStatus::Failed;
        state.finished_at = Some(Utc::now());
        state.message = Some(error.clone());
        state.error = Some(error);
    }

    /// Request cancellation; the worker observes it at the next fold or
    /// model boundary.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn progress(&self) -> (usize, usize) {
        (
            self.inner.done.load(Ordering::Relaxed),
            self.inner.total.load(Ordering::Relaxed),
        )
    }

    pub fn status(&self) -> JobStatus {
        self.inner.state.read().status
    }

    pub fn snapshot(&self) -> TrainingJob {
        let state = self.inner.state.read();
        TrainingJob {
            id: self.inner.id,
            status: state.status,
            message: state.message.clone(),
            created_at: self.inner.created_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
            progress_done: self.inner.done.load(Ordering::Relaxed),
            progress_total: self.inner.total.load(Ordering::Relaxed),
            report: state.report.clone(),
            error: state.error.clone(),
        }
    }
}

impl ProgressSink for JobTracker {
    fn advance(&self) {
        self.inner.done.fetch_add(1, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

/// Create a tracker sized for the request: one step per (fold, model) pair.
pub fn tracker_for(request: &TrainingRequest, config: &NestedCvConfig) -> JobTracker {
    JobTracker::new(config.outer_folds * request.models.len())
}

/// Run an evaluation under a tracker, recording the outcome on it. The
/// tracker ends Completed with a report, or Failed with the error message
/// ("cancelled" when cancellation won the race).
pub fn run_job(
    tracker: &JobTracker,
    table: &MappedTable,
    request: &TrainingRequest,
    config: &NestedCvConfig,
) -> Result<()> {
    tracker.start();
    tracing::info!(job = %tracker.id(), models = request.models.len(),
        folds = config.outer_folds, "training job started");

    match evaluate_models(table, request, config, tracker) {
        Ok(report) => {
            tracing::info!(job = %tracker.id(), "training job completed");
            tracker.complete(report);
            Ok(())
        }
        Err(err) => {
            tracing::warn!(job = %tracker.id(), error = %err, "training job failed");
            let message = if tracker.is_cancelled() {
                "cancelled".to_string()
            } else {
                err.to_string()
            };
            tracker.fail(message.clone());
            Err(AnomalyError::TrainingError(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_states() {
        let tracker = JobTracker::new(10);
        assert_eq!(tracker.status(), JobStatus::Pending);
        assert_eq!(tracker.progress(), (0, 10));

        tracker.start();
        assert_eq!(tracker.status(), JobStatus::Running);
        let snapshot = tracker.snapshot();
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.finished_at.is_none());

        tracker.advance();
        tracker.advance();
        assert_eq!(tracker.progress(), (2, 10));
    }

    #[test]
    fn test_failure_records_message() {
        let tracker = JobTracker::new(5);
        tracker.start();
        tracker.fail("training failed: bad data".to_string());

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("training failed: bad data"));
        assert!(snapshot.finished_at.is_some());
        assert!(snapshot.report.is_none());
    }

    #[test]
    fn test_cancellation_is_visible_to_clones() {
        let tracker = JobTracker::new(5);
        let worker_handle = tracker.clone();
        assert!(!worker_handle.is_cancelled());
        tracker.cancel();
        assert!(worker_handle.is_cancelled());
    }

    #[test]
    fn test_snapshot_serializes() {
        let tracker = JobTracker::new(1);
        let json = serde_json::to_string(&tracker.snapshot()).unwrap();
        assert!(json.contains("pending"));
    }
}
