//! # Bounded Task Queue
//!
//! Capacity-limited FIFO shared between the stages of a pipeline. Besides
//! `put`/`get` it tracks how many items were enqueued but not yet marked
//! processed, and `join` waits for that count to reach zero. Capacity is the
//! only back-pressure mechanism: a slow consumer stalls its producers.
//!
//! `put` and `get` are cancel-safe. A call dropped while suspended has not
//! touched the queue; once the slot or item permit is taken the rest of the
//! operation completes without another suspension point.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};

use crate::error::{PipelineError, Result};

pub struct TaskQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    /// One permit per free slot
    free_slots: Semaphore,
    /// One permit per item ready to be taken
    ready_items: Semaphore,
    /// Items put but not yet marked done
    unfinished: watch::Sender<usize>,
    /// Lifetime count of successful mark_done calls
    completed: AtomicU64,
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::Configuration(
                "queue capacity must be at least 1".to_string(),
            ));
        }

        let (unfinished, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(QueueInner {
                capacity,
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                free_slots: Semaphore::new(capacity),
                ready_items: Semaphore::new(0),
                unfinished,
                completed: AtomicU64::new(0),
            }),
        })
    }

    /// Append to the tail, waiting while the queue is full.
    pub async fn put(&self, item: T) -> Result<()> {
        self.inner
            .free_slots
            .acquire()
            .await
            .map_err(|_| PipelineError::QueueMisuse("queue slots closed".to_string()))?
            .forget();

        self.inner.unfinished.send_modify(|count| *count += 1);
        self.inner.items.lock().push_back(item);
        self.inner.ready_items.add_permits(1);
        Ok(())
    }

    /// Remove and return the head, waiting while the queue is empty.
    pub async fn get(&self) -> Result<T> {
        self.inner
            .ready_items
            .acquire()
            .await
            .map_err(|_| PipelineError::QueueMisuse("queue items closed".to_string()))?
            .forget();

        let item = self.inner.items.lock().pop_front().ok_or_else(|| {
            PipelineError::QueueMisuse("item permit granted on an empty queue".to_string())
        })?;
        self.inner.free_slots.add_permits(1);
        Ok(item)
    }

    /// Record that one previously taken item has been fully processed.
    pub fn mark_done(&self) -> Result<()> {
        let mut underflow = false;
        self.inner.unfinished.send_if_modified(|count| {
            if *count == 0 {
                underflow = true;
                false
            } else {
                *count -= 1;
                true
            }
        });

        if underflow {
            return Err(PipelineError::QueueMisuse(
                "mark_done called more times than items were put".to_string(),
            ));
        }
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Wait until every item ever put has been marked done.
    pub async fn join(&self) -> Result<()> {
        let mut unfinished = self.inner.unfinished.subscribe();
        unfinished
            .wait_for(|count| *count == 0)
            .await
            .map_err(|_| PipelineError::QueueMisuse("queue dropped while joining".to_string()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn unfinished(&self) -> usize {
        *self.inner.unfinished.borrow()
    }

    /// Items marked done since the queue was created.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .field("unfinished", &self.unfinished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, assert_ready_ok, task};

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            TaskQueue::<u32>::new(0),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = TaskQueue::new(8).unwrap();
        for i in 0..5 {
            queue.put(i).await.unwrap();
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.unfinished(), 5);

        for expected in 0..5 {
            assert_eq!(queue.get().await.unwrap(), expected);
        }
        assert!(queue.is_empty());
        // Taking items does not finish them
        assert_eq!(queue.unfinished(), 5);
    }

    #[test]
    fn test_put_waits_while_full() {
        let queue = TaskQueue::new(1).unwrap();

        let mut first = task::spawn(queue.put(1));
        assert_ready_ok!(first.poll());

        let mut second = task::spawn(queue.put(2));
        assert_pending!(second.poll());

        let mut get = task::spawn(queue.get());
        assert_eq!(assert_ready_ok!(get.poll()), 1);

        assert!(second.is_woken());
        assert_ready_ok!(second.poll());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_get_waits_while_empty() {
        let queue = TaskQueue::new(4).unwrap();

        let mut get = task::spawn(queue.get());
        assert_pending!(get.poll());

        let mut put = task::spawn(queue.put("a"));
        assert_ready_ok!(put.poll());

        assert!(get.is_woken());
        assert_eq!(assert_ready_ok!(get.poll()), "a");
    }

    #[test]
    fn test_dropped_get_does_not_lose_items() {
        let queue = TaskQueue::new(4).unwrap();

        let mut abandoned = task::spawn(queue.get());
        assert_pending!(abandoned.poll());
        drop(abandoned);

        let mut put = task::spawn(queue.put(7));
        assert_ready_ok!(put.poll());

        let mut get = task::spawn(queue.get());
        assert_eq!(assert_ready_ok!(get.poll()), 7);
    }

    #[test]
    fn test_mark_done_underflow_is_an_error() {
        let queue = TaskQueue::<u8>::new(2).unwrap();
        assert!(matches!(
            queue.mark_done(),
            Err(PipelineError::QueueMisuse(_))
        ));
        assert_eq!(queue.unfinished(), 0);
    }

    #[test]
    fn test_join_returns_immediately_when_nothing_pending() {
        let queue = TaskQueue::<u8>::new(2).unwrap();
        let mut join = task::spawn(queue.join());
        assert_ready!(join.poll()).unwrap();
    }

    #[test]
    fn test_join_waits_for_every_item_to_be_marked() {
        let queue = TaskQueue::new(4).unwrap();
        assert_ready_ok!(task::spawn(queue.put(1)).poll());
        assert_ready_ok!(task::spawn(queue.put(2)).poll());

        let mut join = task::spawn(queue.join());
        assert_pending!(join.poll());

        assert_ready_ok!(task::spawn(queue.get()).poll());
        queue.mark_done().unwrap();
        assert_pending!(join.poll());

        assert_ready_ok!(task::spawn(queue.get()).poll());
        queue.mark_done().unwrap();
        assert!(join.is_woken());
        assert_ready!(join.poll()).unwrap();
        assert_eq!(queue.completed(), 2);
    }

    #[tokio::test]
    async fn test_multiple_consumers_take_each_item_once() {
        let queue = TaskQueue::new(4).unwrap();
        let mut consumers = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Ok(Ok(item)) =
                    tokio::time::timeout(std::time::Duration::from_millis(50), queue.get()).await
                {
                    taken.push(item);
                    queue.mark_done().unwrap();
                }
                taken
            }));
        }

        for i in 0..50 {
            queue.put(i).await.unwrap();
        }
        queue.join().await.unwrap();

        let mut seen = Vec::new();
        for consumer in consumers {
            seen.extend(consumer.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}
