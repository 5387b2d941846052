use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::{stages, DEFAULT_QUEUE_CAPACITY};
use crate::error::{PipelineError, Result};
use crate::execution::cancellation::{CancelSignal, StageRole, StageTask};
use crate::models::TaskDefinition;
use crate::queue::TaskQueue;
use crate::streams::{RecordSink, Stream};

/// Output stage: writes every task arriving on a shared queue to a
/// [`RecordSink`].
///
/// The queue is handed in by the caller because workers produce into it.
/// The background task runs until cancelled. A sink write error ends it, and
/// the sink is closed on every exit path.
pub struct OutputStream {
    id: Uuid,
    queue: TaskQueue<TaskDefinition>,
    sink: Option<Box<dyn RecordSink>>,
    task: Option<StageTask>,
    started: bool,
}

impl OutputStream {
    pub fn new(queue: TaskQueue<TaskDefinition>, sink: impl RecordSink) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            sink: Some(Box::new(sink)),
            task: None,
            started: false,
        }
    }

    /// Output stream with a fresh queue of `capacity` items.
    pub fn with_capacity(sink: impl RecordSink, capacity: usize) -> Result<Self> {
        Ok(Self::new(TaskQueue::new(capacity)?, sink))
    }

    pub fn with_default_capacity(sink: impl RecordSink) -> Result<Self> {
        Self::with_capacity(sink, DEFAULT_QUEUE_CAPACITY)
    }
}

impl Stream for OutputStream {
    fn id(&self) -> Uuid {
        self.id
    }

    fn queue(&self) -> &TaskQueue<TaskDefinition> {
        &self.queue
    }

    fn init_stream(&mut self) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.init_stream(),
            None => Err(PipelineError::AlreadyRunning { stream_id: self.id }),
        }
    }

    fn run(&mut self) -> Result<()> {
        if self.started {
            return Err(PipelineError::AlreadyRunning { stream_id: self.id });
        }
        self.init_stream()?;

        let sink = self
            .sink
            .take()
            .ok_or(PipelineError::AlreadyRunning { stream_id: self.id })?;
        let queue = self.queue.clone();
        let stream_id = self.id;
        self.task = Some(StageTask::spawn(stages::OUTPUT, StageRole::Output, move |signal| {
            consume(SinkGuard(Some(sink)), queue, stream_id, signal)
        }));
        self.started = true;
        debug!(stream_id = %self.id, "Output stream running");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.started
    }

    fn take_task(&mut self) -> Option<StageTask> {
        self.task.take()
    }
}

/// Owns the sink for the background task. An explicit [`close`](Self::close)
/// disarms it; otherwise dropping it closes the sink, which covers panics and
/// aborted tasks.
struct SinkGuard(Option<Box<dyn RecordSink>>);

impl SinkGuard {
    fn write(&mut self, task: &TaskDefinition) -> Result<()> {
        match self.0.as_mut() {
            Some(sink) => sink.write(task),
            None => Err(PipelineError::Sink("sink written after close".to_string())),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.0.take() {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        }
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        if let Some(mut sink) = self.0.take() {
            warn!("Sink released without an explicit close");
            if let Err(e) = sink.close() {
                error!(error = %e, "Failed to close sink");
            }
        }
    }
}

async fn consume(
    mut sink: SinkGuard,
    queue: TaskQueue<TaskDefinition>,
    stream_id: Uuid,
    signal: CancelSignal,
) -> Result<()> {
    let outcome = write_all(&mut sink, &queue, stream_id, &signal).await;
    match &outcome {
        Err(e) if e.is_cancelled() => info!(stream_id = %stream_id, "Output task cancelled"),
        Err(e) => error!(
            stream_id = %stream_id,
            error = %e,
            "Output task finished with unexpected error"
        ),
        Ok(()) => {}
    }

    let closed = sink.close();
    info!(stream_id = %stream_id, written = queue.completed(), "📤 Output task finished");
    outcome.and(closed)
}

async fn write_all(
    sink: &mut SinkGuard,
    queue: &TaskQueue<TaskDefinition>,
    stream_id: Uuid,
    signal: &CancelSignal,
) -> Result<()> {
    loop {
        let task = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(PipelineError::cancelled(stages::OUTPUT)),
            task = queue.get() => task?,
        };

        if !task.status.is_terminal() {
            error!(
                stream_id = %stream_id,
                task_id = %task.id,
                status = %task.status,
                "Output stream received unsettled task"
            );
        } else if task.status.is_failure() {
            warn!(stream_id = %stream_id, task_id = %task.id, "Output stream received failed task");
        } else {
            debug!(stream_id = %stream_id, task_id = %task.id, status = %task.status, "Output stream received task");
        }

        sink.write(&task)?;
        queue.mark_done()?;
    }
}
