//! # Workers
//!
//! A [`Worker`] is the transformation step of a pipeline. The orchestrator
//! runs N copies of [`run_worker`], each with its own [`WorkerContext`]
//! created by `worker_init`, all sharing one input queue and one output
//! queue.
//!
//! ## Failure handling
//!
//! An error or panic inside `process` fails that record only: it is logged,
//! the original record is forwarded as [`TaskStatus::Failed`], and the loop
//! carries on. Cancellation interrupts an in-flight `process` as well as a
//! blocked forward. Whatever happens to the record, the input item is marked
//! done so draining the input queue can never hang on a bad record.
//!
//! ## Usage
//!
//! ```rust
//! use async_trait::async_trait;
//! use taskstream::execution::worker::{Worker, WorkerContext};
//! use taskstream::models::{Record, TaskResult};
//!
//! struct Uppercase;
//!
//! #[async_trait]
//! impl Worker for Uppercase {
//!     type Context = ();
//!
//!     fn worker_init(&self) -> taskstream::Result<WorkerContext<()>> {
//!         Ok(WorkerContext::new(()))
//!     }
//!
//!     async fn process(
//!         &self,
//!         mut data: Record,
//!         _context: &mut WorkerContext<()>,
//!     ) -> anyhow::Result<TaskResult> {
//!         for value in data.values_mut() {
//!             if let Some(text) = value.as_str() {
//!                 *value = text.to_uppercase().into();
//!             }
//!         }
//!         Ok(TaskResult::completed(data))
//!     }
//! }
//! ```

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::execution::cancellation::CancelSignal;
use crate::models::{Record, TaskDefinition, TaskResult, TaskStatus};
use crate::queue::TaskQueue;

/// Per-worker-task state, created once by [`Worker::worker_init`]
#[derive(Debug)]
pub struct WorkerContext<C> {
    pub context: C,
    pub worker_id: Uuid,
}

impl<C> WorkerContext<C> {
    /// Wrap `context` with a freshly generated worker id.
    pub fn new(context: C) -> Self {
        Self {
            context,
            worker_id: Uuid::new_v4(),
        }
    }
}

#[async_trait]
pub trait Worker: Send + Sync + 'static {
    type Context: Send + 'static;

    /// One-time setup for a worker task. Failing here is fatal for that task.
    fn worker_init(&self) -> Result<WorkerContext<Self::Context>>;

    /// Transform one record. Errors fail only this record.
    async fn process(
        &self,
        data: Record,
        context: &mut WorkerContext<Self::Context>,
    ) -> anyhow::Result<TaskResult>;
}

/// Worker loop: take, process, forward, mark done. Returns only on
/// cancellation or on a failure outside the per-record boundary.
pub async fn run_worker<W: Worker>(
    worker: Arc<W>,
    stage: String,
    input: TaskQueue<TaskDefinition>,
    output: TaskQueue<TaskDefinition>,
    signal: CancelSignal,
) -> Result<()> {
    let mut context = worker.worker_init().map_err(|e| {
        error!(stage = %stage, error = %e, "Worker initialization failed");
        PipelineError::stage_failed(&stage, e)
    })?;
    let worker_id = context.worker_id;
    info!(stage = %stage, worker_id = %worker_id, "🎯 Worker started");

    let mut processed: u64 = 0;
    loop {
        let waiting_since = Instant::now();
        let task = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                info!(stage = %stage, worker_id = %worker_id, processed, "Worker cancelled");
                return Err(PipelineError::cancelled(stage));
            }
            task = input.get() => task?,
        };
        let task_id = task.id;
        debug!(
            worker_id = %worker_id,
            task_id = %task_id,
            waited_ms = waiting_since.elapsed().as_millis() as u64,
            "Worker picked up task"
        );

        let forwarded = handle_task(worker.as_ref(), &mut context, task, &output, &signal).await;

        // Unconditional: a failed or interrupted task still counts as taken
        input.mark_done()?;
        processed += 1;

        if let Err(e) = forwarded {
            if e.is_cancelled() {
                info!(
                    stage = %stage,
                    worker_id = %worker_id,
                    task_id = %task_id,
                    "Worker cancelled mid-task"
                );
                return Err(PipelineError::cancelled(stage));
            }
            error!(stage = %stage, worker_id = %worker_id, error = %e, "Worker loop failed");
            return Err(e);
        }
        debug!(worker_id = %worker_id, task_id = %task_id, "Worker finished task");
    }
}

async fn handle_task<W: Worker>(
    worker: &W,
    context: &mut WorkerContext<W::Context>,
    task: TaskDefinition,
    output: &TaskQueue<TaskDefinition>,
    signal: &CancelSignal,
) -> Result<()> {
    let worker_id = context.worker_id;
    let started = Instant::now();
    let processing = AssertUnwindSafe(worker.process(task.data.clone(), context)).catch_unwind();
    let outcome = tokio::select! {
        biased;
        outcome = processing => outcome,
        _ = signal.cancelled() => {
            debug!(worker_id = %worker_id, task_id = %task.id, "Processing interrupted by cancellation");
            return Err(PipelineError::cancelled(worker_id.to_string()));
        }
    };

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!(
                worker_id = %worker_id,
                task_id = %task.id,
                error = %e,
                "Task failed during processing"
            );
            TaskResult::failed(task.data.clone(), e.to_string())
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(
                worker_id = %worker_id,
                task_id = %task.id,
                panic = %reason,
                "Task panicked during processing"
            );
            TaskResult::failed(task.data.clone(), format!("panicked: {reason}"))
        }
    };

    debug!(
        worker_id = %worker_id,
        task_id = %task.id,
        status = %result.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Task processed"
    );
    if result.status == TaskStatus::Failed {
        if let Some(reason) = &result.error {
            debug!(task_id = %task.id, reason = %reason, "Forwarding failed task");
        }
    }

    let forwarded = task.with_result(result);
    tokio::select! {
        biased;
        _ = signal.cancelled() => Err(PipelineError::cancelled(worker_id.to_string())),
        put = output.put(forwarded) => put,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
