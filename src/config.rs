use crate::constants::{
    DEFAULT_NUM_WORKERS, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY, ENV_PREFIX,
};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Settings for one pipeline run.
///
/// Layered by [`PipelineConfig::load`]: built-in defaults, then an optional
/// TOML file, then `TASKSTREAM_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub num_workers: usize,
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub log_level: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            log_level: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("num_workers", defaults.num_workers as u64)?
            .set_default("queue_capacity", defaults.queue_capacity as u64)?
            .set_default("poll_interval_ms", defaults.poll_interval_ms)?;

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading pipeline configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: PipelineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(PipelineError::Configuration(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Configuration(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
