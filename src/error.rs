//! Error types for the anomaly detection pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AnomalyError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum AnomalyError {
    /// Dataset-level problems surfaced before any fold loop begins
    /// (unlabelable dataset, empty after filtering, single class overall).
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    /// Rejected synchronously at job submission, before any computation.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<polars::error::PolarsError> for AnomalyError {
    fn from(err: polars::error::PolarsError) -> Self {
        AnomalyError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for AnomalyError {
    fn from(err: serde_json::Error) -> Self {
        AnomalyError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for AnomalyError {
    fn from(err: ndarray::ShapeError) -> Self {
        AnomalyError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnomalyError::DataError("label column missing".to_string());
        assert_eq!(err.to_string(), "Data error: label column missing");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AnomalyError = io_err.into();
        assert!(matches!(err, AnomalyError::IoError(_)));
    }
}
