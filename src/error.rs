//! Unified error hierarchy for TrainRisk
//!
//! Most conditions inside the load pipeline never surface as errors: missing
//! sensor data, unknown tiers and arithmetic edge cases all resolve to a
//! fallback value with an audit trail. What remains here are the failures that
//! belong to callers and collaborators: a misused date range, an activity
//! source that could not deliver, or configuration files that cannot be read.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::UserId;

/// Top-level error type for all TrainRisk operations
#[derive(Debug, Error)]
pub enum TrainRiskError {
    /// Pipeline misuse by the caller
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Activity/profile collaborator failures
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors (JSON/CSV/TOML)
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the per-user pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Window start after window end
    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}

/// Errors raised by collaborators supplying activities and profiles
#[derive(Debug, Error)]
pub enum SourceError {
    /// User unknown to the source
    #[error("User not found: {user}")]
    UserNotFound { user: UserId },

    /// Source could not be reached or read
    #[error("Source unavailable for {user}: {reason}")]
    Unavailable { user: UserId, reason: String },

    /// File-backed source could not open its file
    #[error("Cannot read source file {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

/// Result type alias for TrainRisk operations
pub type Result<T> = std::result::Result<T, TrainRiskError>;

impl From<serde_json::Error> for TrainRiskError {
    fn from(err: serde_json::Error) -> Self {
        TrainRiskError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for TrainRiskError {
    fn from(err: csv::Error) -> Self {
        TrainRiskError::Serialization(err.to_string())
    }
}

impl TrainRiskError {
    /// Check if error is retryable by re-running the batch
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrainRiskError::Source(SourceError::Unavailable { .. })
                | TrainRiskError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TrainRiskError::Source(SourceError::UserNotFound { .. }) => ErrorSeverity::Warning,
            TrainRiskError::Source(SourceError::Unavailable { .. }) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}
