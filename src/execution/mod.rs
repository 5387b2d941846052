//! # Execution
//!
//! Concurrency engine of a pipeline run: per-stage cancellation, the worker
//! loop, and the orchestrator that supervises them.

pub mod cancellation;
pub mod pipeline;
pub mod worker;

pub use cancellation::{cancel_all, CancelSignal, StageExit, StageRole, StageTask};
pub use pipeline::{Pipeline, PipelineBuilder, RunSummary, StageCounts};
pub use worker::{run_worker, Worker, WorkerContext};
