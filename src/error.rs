//! Error types for the pipeline engine and its stream collaborators.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Stream {stream_id} is already running")]
    AlreadyRunning { stream_id: Uuid },

    #[error("Queue misuse: {0}")]
    QueueMisuse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported storage backend for {path}: {reason}")]
    UnsupportedBackend { path: String, reason: String },

    #[error("Source error: {0}")]
    Source(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Stage {stage} cancelled")]
    Cancelled { stage: String },

    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },
}

impl PipelineError {
    /// True for the propagated cancellation a stage returns after being asked to stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }

    pub fn cancelled(stage: impl Into<String>) -> Self {
        PipelineError::Cancelled {
            stage: stage.into(),
        }
    }

    pub fn stage_failed(stage: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::StageFailed {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(error: config::ConfigError) -> Self {
        PipelineError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
