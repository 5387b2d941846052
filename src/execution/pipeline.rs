//! # Pipeline Orchestrator
//!
//! Owns one run of a pipeline: starts the input stage, N worker stages and
//! the output stage, supervises them, and shuts them down in an order that
//! cannot deadlock.
//!
//! ## Shutdown
//!
//! - **Failure path**: the first stage to end with an error (or a worker or
//!   output stage that ends at all) fails the run. Every still-pending stage
//!   is cancelled and awaited one by one, and nothing is drained.
//! - **Success path**: once the input stage has exhausted its source, the
//!   input queue is joined, then the output queue. Only then are the workers
//!   cancelled, and after them the output stage. Supervision continues while
//!   joining, so a stage that breaks mid-drain still takes the failure path.

use chrono::{DateTime, Utc};
use futures::future::select_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::constants::{stages, DEFAULT_NUM_WORKERS, DEFAULT_POLL_INTERVAL};
use crate::error::{PipelineError, Result};
use crate::execution::cancellation::{cancel_all, StageExit, StageRole, StageTask};
use crate::execution::worker::{run_worker, Worker};
use crate::streams::{InputStream, OutputStream, Stream};

/// Stages started for a run, by role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub input: usize,
    pub workers: usize,
    pub output: usize,
}

impl StageCounts {
    fn of(tasks: &[StageTask]) -> Self {
        tasks.iter().fold(Self::default(), |mut counts, task| {
            match task.role() {
                StageRole::Input => counts.input += 1,
                StageRole::Worker => counts.workers += 1,
                StageRole::Output => counts.output += 1,
            }
            counts
        })
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub num_workers: usize,
    pub stages: StageCounts,
    /// Input items marked done by workers
    pub records_processed: u64,
    /// Output items written by the output stage
    pub records_written: u64,
}

pub struct Pipeline<W: Worker> {
    input: InputStream,
    worker: Arc<W>,
    output: OutputStream,
    num_workers: usize,
    poll_interval: Duration,
}

pub struct PipelineBuilder<W: Worker> {
    input: Option<InputStream>,
    worker: Option<Arc<W>>,
    output: Option<OutputStream>,
    num_workers: usize,
    poll_interval: Duration,
}

impl<W: Worker> Default for PipelineBuilder<W> {
    fn default() -> Self {
        Self {
            input: None,
            worker: None,
            output: None,
            num_workers: DEFAULT_NUM_WORKERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl<W: Worker> PipelineBuilder<W> {
    pub fn input(mut self, input: InputStream) -> Self {
        self.input = Some(input);
        self
    }

    pub fn worker(mut self, worker: W) -> Self {
        self.worker = Some(Arc::new(worker));
        self
    }

    pub fn shared_worker(mut self, worker: Arc<W>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn output(mut self, output: OutputStream) -> Self {
        self.output = Some(output);
        self
    }

    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn build(self) -> Result<Pipeline<W>> {
        let missing = |part: &str| PipelineError::Configuration(format!("pipeline needs {part}"));

        if self.num_workers == 0 {
            return Err(PipelineError::Configuration(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PipelineError::Configuration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        Ok(Pipeline {
            input: self.input.ok_or_else(|| missing("an input stream"))?,
            worker: self.worker.ok_or_else(|| missing("a worker"))?,
            output: self.output.ok_or_else(|| missing("an output stream"))?,
            num_workers: self.num_workers,
            poll_interval: self.poll_interval,
        })
    }
}

impl<W: Worker> Pipeline<W> {
    pub fn builder() -> PipelineBuilder<W> {
        PipelineBuilder::default()
    }

    pub fn from_config(
        config: &PipelineConfig,
        input: InputStream,
        worker: W,
        output: OutputStream,
    ) -> Result<Self> {
        config.validate()?;
        Self::builder()
            .input(input)
            .worker(worker)
            .output(output)
            .num_workers(config.num_workers)
            .poll_interval(config.poll_interval())
            .build()
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run the pipeline to completion.
    pub async fn run(mut self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let input_queue = self.input.queue().clone();
        let output_queue = self.output.queue().clone();

        info!(
            input_stream = %self.input.id(),
            output_stream = %self.output.id(),
            num_workers = self.num_workers,
            "🚀 Starting pipeline"
        );

        self.input.run()?;
        let mut pending = Vec::with_capacity(self.num_workers + 2);
        pending.push(self.input.take_task().ok_or_else(|| {
            PipelineError::Configuration("input stream did not start a task".to_string())
        })?);

        for index in 0..self.num_workers {
            let stage = stages::worker(index);
            let worker = Arc::clone(&self.worker);
            let input = input_queue.clone();
            let output = output_queue.clone();
            let name = stage.clone();
            pending.push(StageTask::spawn(stage, StageRole::Worker, move |signal| {
                run_worker(worker, name, input, output, signal)
            }));
        }

        if let Err(e) = self.output.run() {
            error!(error = %e, "Output stream failed to start");
            cancel_all(pending).await;
            return Err(e);
        }
        match self.output.take_task() {
            Some(task) => pending.push(task),
            None => {
                cancel_all(pending).await;
                return Err(PipelineError::Configuration(
                    "output stream did not start a task".to_string(),
                ));
            }
        }
        let stage_counts = StageCounts::of(&pending);
        info!(
            inputs = stage_counts.input,
            workers = stage_counts.workers,
            outputs = stage_counts.output,
            "All pipeline stages started"
        );

        let mut inputs_remaining = 1usize;
        while inputs_remaining > 0 {
            for exit in collect_finished(&mut pending, self.poll_interval).await {
                match (exit.role, exit.result) {
                    (StageRole::Input, Ok(())) => {
                        inputs_remaining -= 1;
                        info!(stage = %exit.name, "Input stage finished");
                    }
                    (_, result) => return Err(abort(pending, exit.name, result).await),
                }
            }
        }

        info!(unfinished = input_queue.unfinished(), "Draining input queue");
        if let Some(exit) = drain(&mut pending, input_queue.join(), self.poll_interval).await? {
            return Err(abort(pending, exit.name, exit.result).await);
        }
        info!(unfinished = output_queue.unfinished(), "Draining output queue");
        if let Some(exit) = drain(&mut pending, output_queue.join(), self.poll_interval).await? {
            return Err(abort(pending, exit.name, exit.result).await);
        }

        let (outputs, workers): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|task| task.role() == StageRole::Output);
        let confirmed = cancel_all(workers).await;
        info!(confirmed, "Gathered worker tasks");
        let confirmed = cancel_all(outputs).await;
        info!(confirmed, "Gathered output tasks");

        let summary = RunSummary {
            started_at,
            elapsed: clock.elapsed(),
            num_workers: self.num_workers,
            stages: stage_counts,
            records_processed: input_queue.completed(),
            records_written: output_queue.completed(),
        };
        info!(
            elapsed_ms = summary.elapsed.as_millis() as u64,
            records_processed = summary.records_processed,
            records_written = summary.records_written,
            "✅ Pipeline finished"
        );
        Ok(summary)
    }
}

/// Wait up to `poll_interval` for a stage to finish, then sweep up any
/// others that finished in the meantime.
async fn collect_finished(pending: &mut Vec<StageTask>, poll_interval: Duration) -> Vec<StageExit> {
    let mut exits = Vec::new();
    if pending.is_empty() {
        tokio::time::sleep(poll_interval).await;
        return exits;
    }

    match tokio::time::timeout(poll_interval, next_exit(pending)).await {
        Ok(exit) => exits.push(exit),
        Err(_) => debug!(pending = pending.len(), "No stage finished this poll interval"),
    }

    let mut index = 0;
    while index < pending.len() {
        if pending[index].is_finished() {
            exits.push(pending.swap_remove(index).join().await);
        } else {
            index += 1;
        }
    }
    exits
}

/// Resolve with the first pending stage to finish. Never resolves when
/// nothing is pending.
async fn next_exit(pending: &mut Vec<StageTask>) -> StageExit {
    if pending.is_empty() {
        return std::future::pending().await;
    }
    let (joined, index, others) =
        select_all(pending.iter_mut().map(StageTask::handle_mut)).await;
    drop(others);
    pending.swap_remove(index).exit(joined)
}

/// Wait for `join` while watching the pending stages. Returns the exit of a
/// stage that ended mid-drain, or `None` once the queue is drained.
async fn drain<F>(
    pending: &mut Vec<StageTask>,
    join: F,
    poll_interval: Duration,
) -> Result<Option<StageExit>>
where
    F: Future<Output = Result<()>>,
{
    tokio::pin!(join);
    loop {
        tokio::select! {
            biased;
            joined = &mut join => {
                joined?;
                return Ok(None);
            }
            exit = next_exit(pending) => return Ok(Some(exit)),
            _ = tokio::time::sleep(poll_interval) => {
                debug!(pending = pending.len(), "Still draining");
            }
        }
    }
}

/// Cancel everything still pending and describe why the run failed.
async fn abort(pending: Vec<StageTask>, stage: String, result: Result<()>) -> PipelineError {
    let failure = match result {
        Err(failure @ PipelineError::StageFailed { .. }) => failure,
        Err(e) => PipelineError::stage_failed(&stage, e),
        Ok(()) => PipelineError::stage_failed(&stage, "stage stopped before it was cancelled"),
    };
    error!(stage = %stage, error = %failure, "Stage failed, cancelling pipeline");

    let remaining = pending.len();
    let confirmed = cancel_all(pending).await;
    if confirmed < remaining {
        warn!(confirmed, remaining, "Not every stage confirmed cancellation");
    }
    error!(stage = %stage, "Finished with Error.");
    failure
}
