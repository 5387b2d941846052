#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskstream
//!
//! Streaming task pipeline: records are pulled one at a time from an input
//! source, fanned out to a pool of concurrent workers, and fanned back in to a
//! single output sink.
//!
//! ## Architecture
//!
//! ```text
//! InputStream ──▶ input queue ──▶ Worker × N ──▶ output queue ──▶ OutputStream ──▶ sink
//! ```
//!
//! Stages are connected only by bounded [`TaskQueue`]s, which provide
//! back-pressure and the `join` used for draining. The [`Pipeline`]
//! orchestrator supervises every stage and shuts them down in order: the
//! input queue is drained before workers are cancelled, the output queue
//! before the output stage is.
//!
//! ## Module Organization
//!
//! - [`models`] - Task and result records passed between stages
//! - [`queue`] - Bounded FIFO with `join`
//! - [`execution`] - Cancellation, the worker loop and the orchestrator
//! - [`streams`] - Input and output stages, file formats and storage
//! - [`workers`] - Ready-made workers
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskstream::streams::formats::{CsvSink, CsvSource};
//! use taskstream::streams::{FileHandle, InputStream, OutputStream};
//! use taskstream::workers::PassthroughWorker;
//! use taskstream::Pipeline;
//!
//! # async fn example() -> taskstream::Result<()> {
//! let source = CsvSource::open(&FileHandle::new("input.csv", false))?;
//! let sink = CsvSink::open(&FileHandle::new("output.csv", true), None)?;
//!
//! let summary = Pipeline::builder()
//!     .input(InputStream::new(source, 1024)?)
//!     .worker(PassthroughWorker)
//!     .output(OutputStream::with_capacity(sink, 1024)?)
//!     .num_workers(4)
//!     .build()?
//!     .run()
//!     .await?;
//!
//! println!("wrote {} records", summary.records_written);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod queue;
pub mod streams;
pub mod workers;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use execution::{Pipeline, PipelineBuilder, RunSummary, Worker, WorkerContext};
pub use models::{Record, TaskDefinition, TaskResult, TaskStatus};
pub use queue::TaskQueue;
