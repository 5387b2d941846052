//! # Streams
//!
//! Input and output stages of a pipeline and the contracts for the record
//! sources and sinks they wrap.
//!
//! - [`InputStream`] owns its queue and runs one background task that pulls
//!   records from a [`RecordSource`] and enqueues them as tasks.
//! - [`OutputStream`] is handed the queue the workers write to and runs one
//!   background task that writes each item to a [`RecordSink`].
//!
//! Concrete sources and sinks live in [`formats`] and are selected by
//! [`formats::FileFormat`].

pub mod file;
pub mod formats;
pub mod input;
pub mod output;
pub mod schema;

pub use file::{FileHandle, StorageBackend};
pub use input::InputStream;
pub use output::OutputStream;
pub use schema::{ColumnIndex, ColumnType, ColumnTypes};

use uuid::Uuid;

use crate::error::Result;
use crate::execution::cancellation::StageTask;
use crate::models::{Record, TaskDefinition};
use crate::queue::TaskQueue;

/// Common surface of input and output stages
pub trait Stream {
    fn id(&self) -> Uuid;

    /// The queue this stream feeds (input) or drains (output).
    fn queue(&self) -> &TaskQueue<TaskDefinition>;

    /// Prepare the wrapped source or sink, e.g. read or write a header.
    fn init_stream(&mut self) -> Result<()>;

    /// Initialize and spawn the background task. A second call is a usage
    /// error reported as [`PipelineError::AlreadyRunning`](crate::PipelineError::AlreadyRunning).
    fn run(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Hand the spawned task to a supervisor.
    fn take_task(&mut self) -> Option<StageTask>;
}

/// A lazy, finite, non-restartable sequence of records.
///
/// Calls are synchronous and run directly on the input stage's task, so a
/// slow read holds that executor thread until it returns. Do not wrap reads
/// in `block_in_place`; it panics on a current-thread runtime. Sources backed
/// by a network store should buffer ahead of `next_record`.
pub trait RecordSource: Send + 'static {
    /// Prepare for iteration; column metadata is available afterwards.
    fn init_stream(&mut self) -> Result<()>;

    /// Next record, or `None` once the source is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>>;

    fn columns(&self) -> &ColumnIndex;

    fn types(&self) -> &ColumnTypes;
}

/// Destination for finished tasks.
///
/// Synchronous like [`RecordSource`]. The output stage calls `close` exactly
/// once on every exit path.
pub trait RecordSink: Send + 'static {
    fn init_stream(&mut self) -> Result<()>;

    fn write(&mut self, task: &TaskDefinition) -> Result<()>;

    /// Flush and release. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn init_stream(&mut self) -> Result<()> {
        (**self).init_stream()
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        (**self).next_record()
    }

    fn columns(&self) -> &ColumnIndex {
        (**self).columns()
    }

    fn types(&self) -> &ColumnTypes {
        (**self).types()
    }
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn init_stream(&mut self) -> Result<()> {
        (**self).init_stream()
    }

    fn write(&mut self, task: &TaskDefinition) -> Result<()> {
        (**self).write(task)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
