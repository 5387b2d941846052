//! In-memory sources, sinks and workers shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskstream::streams::{ColumnIndex, ColumnType, ColumnTypes, RecordSink, RecordSource};
use taskstream::{PipelineError, Record, TaskDefinition, TaskResult, TaskStatus, Worker, WorkerContext};

/// Poll interval short enough to keep the suites fast
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn record(a: i64) -> Record {
    let mut record = Record::new();
    record.insert("a".to_string(), json!(a));
    record
}

pub fn records(values: impl IntoIterator<Item = i64>) -> Vec<Record> {
    values.into_iter().map(record).collect()
}

pub fn value_of(task: &TaskDefinition) -> i64 {
    task.data["a"].as_i64().expect("record has an integer `a`")
}

/// Finite source over a fixed list, optionally failing after `fail_after` records
pub struct VecSource {
    records: VecDeque<Record>,
    fail_after: Option<usize>,
    read_delay: Option<Duration>,
    yielded: usize,
    columns: ColumnIndex,
    types: ColumnTypes,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
            fail_after: None,
            read_delay: None,
            yielded: 0,
            columns: ColumnIndex::new(),
            types: ColumnTypes::new(),
        }
    }

    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Block the calling thread for `delay` on every read, like a slow disk.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }
}

impl RecordSource for VecSource {
    fn init_stream(&mut self) -> taskstream::Result<()> {
        self.columns.insert("a".to_string(), 0);
        self.types.insert("a".to_string(), ColumnType::Int64);
        Ok(())
    }

    fn next_record(&mut self) -> taskstream::Result<Option<Record>> {
        if self.fail_after == Some(self.yielded) {
            return Err(PipelineError::Source("source went away".to_string()));
        }
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        self.yielded += 1;
        Ok(self.records.pop_front())
    }

    fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    fn types(&self) -> &ColumnTypes {
        &self.types
    }
}

/// Source that never runs out; flags when it has been dropped
pub struct EndlessSource {
    next: i64,
    dropped: Arc<AtomicBool>,
    columns: ColumnIndex,
    types: ColumnTypes,
}

impl EndlessSource {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = Self {
            next: 0,
            dropped: dropped.clone(),
            columns: ColumnIndex::new(),
            types: ColumnTypes::new(),
        };
        (source, dropped)
    }
}

impl RecordSource for EndlessSource {
    fn init_stream(&mut self) -> taskstream::Result<()> {
        Ok(())
    }

    fn next_record(&mut self) -> taskstream::Result<Option<Record>> {
        self.next += 1;
        Ok(Some(record(self.next)))
    }

    fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    fn types(&self) -> &ColumnTypes {
        &self.types
    }
}

impl Drop for EndlessSource {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct SinkState {
    pub written: Vec<TaskDefinition>,
    pub inits: usize,
    pub closes: usize,
}

/// Sink collecting everything it is given. Fails on write number
/// `fail_on` (1-based) when set.
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
    fail_on: Option<usize>,
    writes: usize,
}

impl MemorySink {
    pub fn new() -> (Self, Arc<Mutex<SinkState>>) {
        let state = Arc::new(Mutex::new(SinkState::default()));
        let sink = Self {
            state: state.clone(),
            fail_on: None,
            writes: 0,
        };
        (sink, state)
    }

    pub fn failing_on(mut self, write: usize) -> Self {
        self.fail_on = Some(write);
        self
    }
}

impl RecordSink for MemorySink {
    fn init_stream(&mut self) -> taskstream::Result<()> {
        self.state.lock().inits += 1;
        Ok(())
    }

    fn write(&mut self, task: &TaskDefinition) -> taskstream::Result<()> {
        self.writes += 1;
        if self.fail_on == Some(self.writes) {
            return Err(PipelineError::Sink("disk full".to_string()));
        }
        self.state.lock().written.push(task.clone());
        Ok(())
    }

    fn close(&mut self) -> taskstream::Result<()> {
        self.state.lock().closes += 1;
        Ok(())
    }
}

/// Decrements the shared live-worker count when a worker context is dropped
pub struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Doubles `a`; errors on values in `fail_on`, panics on values in `panic_on`.
#[derive(Default)]
pub struct DoublingWorker {
    pub fail_on: Vec<i64>,
    pub panic_on: Vec<i64>,
    pub delay: Option<Duration>,
    pub live: Arc<AtomicUsize>,
    pub inits: Arc<AtomicUsize>,
    pub broken_init: bool,
}

impl DoublingWorker {
    pub fn live_workers(&self) -> Arc<AtomicUsize> {
        self.live.clone()
    }
}

#[async_trait]
impl Worker for DoublingWorker {
    type Context = LiveGuard;

    fn worker_init(&self) -> taskstream::Result<WorkerContext<LiveGuard>> {
        if self.broken_init {
            return Err(PipelineError::Configuration("model missing".to_string()));
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(WorkerContext::new(LiveGuard(self.live.clone())))
    }

    async fn process(
        &self,
        mut data: Record,
        _context: &mut WorkerContext<LiveGuard>,
    ) -> anyhow::Result<TaskResult> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let value = data
            .get("a")
            .and_then(|value| value.as_i64())
            .ok_or_else(|| anyhow::anyhow!("record has no integer `a`"))?;
        if self.fail_on.contains(&value) {
            anyhow::bail!("refusing to process {value}");
        }
        if self.panic_on.contains(&value) {
            panic!("worker blew up on {value}");
        }
        data.insert("a".to_string(), json!(value * 2));
        Ok(TaskResult::completed(data))
    }
}

pub fn statuses(state: &SinkState) -> (usize, usize) {
    let completed = state
        .written
        .iter()
        .filter(|task| task.status == TaskStatus::Completed)
        .count();
    let failed = state
        .written
        .iter()
        .filter(|task| task.status == TaskStatus::Failed)
        .count();
    (completed, failed)
}
