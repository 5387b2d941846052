use tracing::{debug, error, info};
use uuid::Uuid;

use crate::constants::{stages, DEFAULT_QUEUE_CAPACITY};
use crate::error::{PipelineError, Result};
use crate::execution::cancellation::{CancelSignal, StageRole, StageTask};
use crate::models::TaskDefinition;
use crate::queue::TaskQueue;
use crate::streams::{RecordSource, Stream};

/// Input stage: turns records from a [`RecordSource`] into tasks on its own
/// queue.
///
/// The background task stops normally once the source is exhausted. It never
/// marks items done; that is left to the queue's consumers.
pub struct InputStream {
    id: Uuid,
    queue: TaskQueue<TaskDefinition>,
    source: Option<Box<dyn RecordSource>>,
    task: Option<StageTask>,
    started: bool,
}

impl InputStream {
    pub fn new(source: impl RecordSource, capacity: usize) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            queue: TaskQueue::new(capacity)?,
            source: Some(Box::new(source)),
            task: None,
            started: false,
        })
    }

    pub fn with_default_capacity(source: impl RecordSource) -> Result<Self> {
        Self::new(source, DEFAULT_QUEUE_CAPACITY)
    }
}

impl Stream for InputStream {
    fn id(&self) -> Uuid {
        self.id
    }

    fn queue(&self) -> &TaskQueue<TaskDefinition> {
        &self.queue
    }

    fn init_stream(&mut self) -> Result<()> {
        match self.source.as_mut() {
            Some(source) => source.init_stream(),
            None => Err(PipelineError::AlreadyRunning { stream_id: self.id }),
        }
    }

    fn run(&mut self) -> Result<()> {
        if self.started {
            return Err(PipelineError::AlreadyRunning { stream_id: self.id });
        }
        self.init_stream()?;

        let source = self
            .source
            .take()
            .ok_or(PipelineError::AlreadyRunning { stream_id: self.id })?;
        let queue = self.queue.clone();
        let stream_id = self.id;
        self.task = Some(StageTask::spawn(stages::INPUT, StageRole::Input, move |signal| {
            produce(source, queue, stream_id, signal)
        }));
        self.started = true;
        debug!(stream_id = %self.id, "Input stream running");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.started
    }

    fn take_task(&mut self) -> Option<StageTask> {
        self.task.take()
    }
}

async fn produce(
    mut source: Box<dyn RecordSource>,
    queue: TaskQueue<TaskDefinition>,
    stream_id: Uuid,
    signal: CancelSignal,
) -> Result<()> {
    let mut produced: u64 = 0;
    loop {
        if signal.is_cancelled() {
            info!(stream_id = %stream_id, produced, "Input task cancelled");
            return Err(PipelineError::cancelled(stages::INPUT));
        }

        let record = match source.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                error!(stream_id = %stream_id, produced, error = %e, "Input source failed");
                return Err(e);
            }
        };

        let task = TaskDefinition::new(stream_id, record);
        let task_id = task.id;
        tokio::select! {
            biased;
            _ = signal.cancelled() => {
                info!(stream_id = %stream_id, produced, "Input task cancelled");
                return Err(PipelineError::cancelled(stages::INPUT));
            }
            put = queue.put(task) => put?,
        }
        produced += 1;
        debug!(stream_id = %stream_id, task_id = %task_id, "Enqueued task");
    }

    info!(stream_id = %stream_id, produced, "📥 Input source exhausted");
    Ok(())
}
