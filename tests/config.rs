//! Configuration Module Tests
//!
//! Tests for PipelineConfig layering: defaults, TOML file, environment.

use std::io::Write;
use std::time::Duration;
use taskstream::{PipelineConfig, PipelineError};

#[test]
fn config_has_expected_defaults() {
    let config = PipelineConfig::default();

    assert_eq!(config.num_workers, 1);
    assert_eq!(config.queue_capacity, 1024);
    assert_eq!(config.poll_interval_ms, 2000);
    assert_eq!(config.poll_interval(), Duration::from_secs(2));
    assert!(config.log_level.is_none());
}

#[test]
fn config_missing_file_is_an_error() {
    let result = PipelineConfig::load(Some(std::path::Path::new("/nonexistent/taskstream.toml")));
    assert!(matches!(result, Err(PipelineError::Configuration(_))));
}

// File and environment layering share process-wide state, so they run in one test
#[test]
fn config_layers_file_then_environment() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "num_workers = 4").unwrap();
    writeln!(file, "queue_capacity = 16").unwrap();
    writeln!(file, "log_level = \"warn\"").unwrap();

    let config = PipelineConfig::load(Some(file.path())).expect("file should load");
    assert_eq!(config.num_workers, 4);
    assert_eq!(config.queue_capacity, 16);
    assert_eq!(config.poll_interval_ms, 2000);
    assert_eq!(config.log_level.as_deref(), Some("warn"));

    std::env::set_var("TASKSTREAM_NUM_WORKERS", "6");
    let config = PipelineConfig::load(Some(file.path()));
    std::env::remove_var("TASKSTREAM_NUM_WORKERS");
    let config = config.expect("environment override should load");
    assert_eq!(config.num_workers, 6);
    assert_eq!(config.queue_capacity, 16);

    std::env::set_var("TASKSTREAM_QUEUE_CAPACITY", "0");
    let rejected = PipelineConfig::from_env();
    std::env::remove_var("TASKSTREAM_QUEUE_CAPACITY");
    assert!(matches!(rejected, Err(PipelineError::Configuration(_))));
}
