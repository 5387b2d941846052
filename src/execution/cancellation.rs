//! Per-stage cancellation and task handles.
//!
//! Every pipeline stage runs as its own tokio task with its own
//! [`CancelSignal`]. A stage only notices cancellation at its queue
//! suspension points; it then cleans up and returns
//! [`PipelineError::Cancelled`], which is how the orchestrator confirms the
//! stage really terminated.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Cooperative cancellation flag for a single stage
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    state: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    Input,
    Worker,
    Output,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Worker => write!(f, "worker"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// A spawned stage: its name, role, cancel signal and join handle.
#[derive(Debug)]
pub struct StageTask {
    name: String,
    role: StageRole,
    signal: CancelSignal,
    handle: JoinHandle<Result<()>>,
}

/// A stage that has stopped, with its flattened outcome
#[derive(Debug)]
pub struct StageExit {
    pub name: String,
    pub role: StageRole,
    pub result: Result<()>,
}

impl StageTask {
    /// Spawn `stage` on the current runtime, handing it a fresh cancel signal.
    pub fn spawn<F, Fut>(name: impl Into<String>, role: StageRole, stage: F) -> Self
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let signal = CancelSignal::new();
        let handle = tokio::spawn(stage(signal.clone()));
        Self {
            name: name.into(),
            role,
            signal,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> StageRole {
        self.role
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.signal.cancel();
    }

    pub(crate) fn handle_mut(&mut self) -> &mut JoinHandle<Result<()>> {
        &mut self.handle
    }

    /// Wait for the stage to stop on its own.
    pub async fn join(mut self) -> StageExit {
        let joined = (&mut self.handle).await;
        self.exit(joined)
    }

    /// Ask the stage to stop and wait until it has.
    pub async fn cancel_and_wait(self) -> StageExit {
        self.cancel();
        self.join().await
    }

    pub(crate) fn exit(self, joined: std::result::Result<Result<()>, JoinError>) -> StageExit {
        let result = match joined {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => Err(PipelineError::stage_failed(
                &self.name,
                format!("panicked: {join_error}"),
            )),
            Err(join_error) => Err(PipelineError::stage_failed(&self.name, join_error)),
        };
        StageExit {
            name: self.name,
            role: self.role,
            result,
        }
    }
}

/// Cancel and await each task in turn.
///
/// Tasks are handled one at a time so a slow cleanup in one stage cannot hide
/// a hang in another. Returns how many stages confirmed cancellation.
pub async fn cancel_all(tasks: Vec<StageTask>) -> usize {
    let mut confirmed = 0;
    for task in tasks {
        let exit = task.cancel_and_wait().await;
        match &exit.result {
            Err(error) if error.is_cancelled() => {
                debug!(stage = %exit.name, "Caught propagated task cancellation");
                confirmed += 1;
            }
            Ok(()) => debug!(stage = %exit.name, "Stage had already finished"),
            Err(error) => warn!(
                stage = %exit.name,
                error = %error,
                "Stage ended with an error while being cancelled"
            ),
        }
        debug!(stage = %exit.name, role = %exit.role, "Awaited stage");
    }
    confirmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::task::yield_now().await;
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should observe cancellation")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_before_wait_is_not_lost() {
        let signal = CancelSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already cancelled signal resolves immediately");
    }

    #[tokio::test]
    async fn test_cancel_all_confirms_each_stage() {
        let tasks: Vec<StageTask> = (0..3)
            .map(|i| {
                StageTask::spawn(format!("worker-{i}"), StageRole::Worker, |signal| async move {
                    signal.cancelled().await;
                    Err(PipelineError::cancelled(format!("worker-{i}")))
                })
            })
            .collect();

        assert_eq!(cancel_all(tasks).await, 3);
    }

    #[tokio::test]
    async fn test_panicking_stage_becomes_stage_failure() {
        let task = StageTask::spawn("output", StageRole::Output, |signal| async move {
            if signal.is_cancelled() {
                return Ok(());
            }
            panic!("sink exploded");
        });

        let exit = task.join().await;
        assert_eq!(exit.role, StageRole::Output);
        match exit.result {
            Err(PipelineError::StageFailed { stage, reason }) => {
                assert_eq!(stage, "output");
                assert!(reason.contains("panicked"));
            }
            other => panic!("unexpected exit: {other:?}"),
        }
    }
}
