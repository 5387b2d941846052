//! Ready-made [`Worker`](crate::execution::Worker) implementations.

use async_trait::async_trait;

use crate::error::Result;
use crate::execution::worker::{Worker, WorkerContext};
use crate::models::{Record, TaskResult};

/// Identity transform: every record is forwarded unchanged as completed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughWorker;

#[async_trait]
impl Worker for PassthroughWorker {
    type Context = ();

    fn worker_init(&self) -> Result<WorkerContext<()>> {
        Ok(WorkerContext::new(()))
    }

    async fn process(
        &self,
        data: Record,
        _context: &mut WorkerContext<()>,
    ) -> anyhow::Result<TaskResult> {
        Ok(TaskResult::completed(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_passthrough_keeps_data() {
        let worker = PassthroughWorker;
        let mut context = worker.worker_init().unwrap();
        let mut data = Record::new();
        data.insert("a".to_string(), json!([1, 2]));

        let result = worker.process(data.clone(), &mut context).await.unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.data, data);
        assert!(result.error.is_none());
    }
}
