use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One row of tabular data: field name to value, in column order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Lifecycle of a single task as it moves through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created by an input stream, not yet picked up by a worker
    NotStarted,
    /// A worker is transforming the record
    InProgress,
    /// Transformation succeeded
    Completed,
    /// Transformation failed; the record still reaches the sink
    Failed,
}

impl TaskStatus {
    /// Completed or failed. Anything else arriving at the output stage is an anomaly.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// A unit of work on a pipeline queue.
///
/// Input streams create these with a fresh id and `NotStarted`. Workers
/// forward the same definition to the output queue with `data` and `status`
/// replaced by the worker's [`TaskResult`], so the output stage sees the
/// original id and the final status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: Uuid,
    pub input_stream_id: Uuid,
    pub data: Record,
    pub status: TaskStatus,
}

impl TaskDefinition {
    pub fn new(input_stream_id: Uuid, data: Record) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_stream_id,
            data,
            status: TaskStatus::NotStarted,
        }
    }

    /// Replace payload and status with a worker's outcome, keeping identity.
    pub fn with_result(self, result: TaskResult) -> Self {
        Self {
            data: result.data,
            status: result.status,
            ..self
        }
    }
}

/// Outcome of a worker's `process` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub data: Record,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// A result still marked in progress; workers are expected to settle it.
    pub fn new(data: Record) -> Self {
        Self {
            data,
            status: TaskStatus::InProgress,
            error: None,
        }
    }

    pub fn completed(data: Record) -> Self {
        Self {
            data,
            status: TaskStatus::Completed,
            error: None,
        }
    }

    pub fn failed(data: Record, reason: impl Into<String>) -> Self {
        Self {
            data,
            status: TaskStatus::Failed,
            error: Some(reason.into()),
        }
    }
}
