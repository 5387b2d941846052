//! # System Constants
//!
//! Defaults and fixed values that define the operational boundaries of a
//! pipeline run.

use std::time::Duration;

/// Default capacity of an input stream's queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of worker tasks.
pub const DEFAULT_NUM_WORKERS: usize = 1;

/// How long the orchestrator waits on pending stages before checking again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Rows per record batch read from or written to a parquet file.
pub const PARQUET_BATCH_SIZE: usize = 1024;

/// URI prefix that routes a path to the remote object-store backend.
pub const REMOTE_OBJECT_PREFIX: &str = "s3://";

/// Environment variable prefix used by the configuration loader.
pub const ENV_PREFIX: &str = "TASKSTREAM";

/// Stage names used in logs and errors
pub mod stages {
    pub const INPUT: &str = "input";
    pub const OUTPUT: &str = "output";
    pub const WORKER_PREFIX: &str = "worker";

    pub fn worker(index: usize) -> String {
        format!("{WORKER_PREFIX}-{index}")
    }
}
