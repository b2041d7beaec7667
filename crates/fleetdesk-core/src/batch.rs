//! Batching of individually requested lookups.
//!
//! Items enqueued under the same batch key accumulate until either the queue
//! reaches `max_batch_size` (flushed immediately) or `batch_delay` has passed
//! since the first item arrived (flushed by a timer). A flush runs every queued
//! unit of work concurrently and settles each caller independently; one
//! failing item never fails its siblings.
//!
//! Every call queues its own unit of work, even when another call in the same
//! window used the same item key; deduplication belongs to the request cache
//! in front of the scheduler.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, join_all};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::clock::{TimerHandle, schedule_async};
use crate::{Error, Result};

type Work<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

struct QueueItem<T> {
    item_key: String,
    work: Work<T>,
    reply: oneshot::Sender<Result<T>>,
}

struct Queue<T> {
    items: Vec<QueueItem<T>>,
    timer: Option<TimerHandle>,
    generation: u64,
}

struct Inner<T> {
    queues: Mutex<HashMap<String, Queue<T>>>,
    max_batch_size: usize,
    batch_delay: Duration,
    enabled: bool,
    generation: AtomicU64,
    batches_flushed: AtomicU64,
    largest_batch: AtomicUsize,
}

/// Batch counters and current queue depths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub queue_depths: BTreeMap<String, usize>,
    pub batches_flushed: u64,
    pub largest_batch: usize,
}

/// Accumulates lookups into bounded batches.
///
/// Cloning yields another handle to the same queues.
pub struct BatchScheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BatchScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for BatchScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("max_batch_size", &self.inner.max_batch_size)
            .field("batch_delay", &self.inner.batch_delay)
            .field("enabled", &self.inner.enabled)
            .finish_non_exhaustive()
    }
}

impl<T> BatchScheduler<T>
where
    T: Clone + Send + 'static,
{
    /// Create a scheduler. A `max_batch_size` of zero is treated as one.
    pub fn new(max_batch_size: usize, batch_delay: Duration) -> Self {
        Self::build(max_batch_size, batch_delay, true)
    }

    /// A scheduler that runs every unit of work immediately.
    pub fn disabled() -> Self {
        Self::build(1, Duration::ZERO, false)
    }

    fn build(max_batch_size: usize, batch_delay: Duration, enabled: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                max_batch_size: max_batch_size.max(1),
                batch_delay,
                enabled,
                generation: AtomicU64::new(0),
                batches_flushed: AtomicU64::new(0),
                largest_batch: AtomicUsize::new(0),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Queue `work` under `batch_key` and wait for its result.
    ///
    /// `work` is not invoked until the batch flushes. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `work`, or [`Error::Cancelled`] if the
    /// queue was cleared before the batch ran.
    pub async fn enqueue<F, Fut>(
        &self,
        batch_key: &str,
        item_key: impl Into<String>,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.inner.enabled {
            return work().await;
        }

        let (reply, receiver) = oneshot::channel();
        let ready = {
            let mut queues = self.inner.lock();
            let item_key = item_key.into();
            let queue = queues
                .entry(batch_key.to_string())
                .or_insert_with(|| Queue {
                    items: Vec::new(),
                    timer: None,
                    generation: self.inner.generation.fetch_add(1, Ordering::Relaxed),
                });

            queue.items.push(QueueItem {
                item_key,
                work: Box::new(move || work().boxed()),
                reply,
            });

            if queue.items.len() >= self.inner.max_batch_size {
                queues.remove(batch_key).map(|full| {
                    if let Some(timer) = &full.timer {
                        timer.cancel();
                    }
                    full.items
                })
            } else {
                if queue.timer.is_none() {
                    queue.timer = Some(self.start_timer(batch_key, queue.generation));
                }
                None
            }
        };

        if let Some(items) = ready {
            debug!(batch = batch_key, size = items.len(), "batch full, flushing");
            tokio::spawn(Inner::run(Arc::clone(&self.inner), items));
        }

        receiver
            .await
            .unwrap_or_else(|_| Err(Error::Cancelled(format!("batch '{batch_key}' was cleared"))))
    }

    fn start_timer(&self, batch_key: &str, generation: u64) -> TimerHandle {
        let inner = Arc::downgrade(&self.inner);
        let batch_key = batch_key.to_string();
        schedule_async(self.inner.batch_delay, async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let items = {
                let mut queues = inner.lock();
                match queues.get(&batch_key) {
                    Some(queue) if queue.generation == generation => {
                        queues.remove(&batch_key).map(|queue| queue.items)
                    },
                    _ => None,
                }
            };
            if let Some(items) = items {
                debug!(batch = %batch_key, size = items.len(), "batch window elapsed, flushing");
                Inner::run(inner, items).await;
            }
        })
    }

    /// Flush every queue now instead of waiting for its timer.
    pub async fn flush_all(&self) {
        let drained: Vec<Vec<QueueItem<T>>> = {
            let mut queues = self.inner.lock();
            queues
                .drain()
                .map(|(_, queue)| {
                    if let Some(timer) = &queue.timer {
                        timer.cancel();
                    }
                    queue.items
                })
                .collect()
        };
        join_all(
            drained
                .into_iter()
                .map(|items| Inner::run(Arc::clone(&self.inner), items)),
        )
        .await;
    }

    /// Drop all queued work without running it. Waiting callers receive
    /// [`Error::Cancelled`]. Returns the number of dropped items.
    pub fn clear(&self) -> usize {
        let mut queues = self.inner.lock();
        let mut dropped = 0;
        for (batch_key, queue) in queues.drain() {
            if let Some(timer) = &queue.timer {
                timer.cancel();
            }
            if !queue.items.is_empty() {
                warn!(batch = %batch_key, items = queue.items.len(), "dropping queued batch");
            }
            dropped += queue.items.len();
        }
        dropped
    }

    /// Pending item count per batch key.
    pub fn queue_depths(&self) -> BTreeMap<String, usize> {
        self.inner
            .lock()
            .iter()
            .map(|(key, queue)| (key.clone(), queue.items.len()))
            .collect()
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            queue_depths: self.queue_depths(),
            batches_flushed: self.inner.batches_flushed.load(Ordering::Relaxed),
            largest_batch: self.inner.largest_batch.load(Ordering::Relaxed),
        }
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + 'static,
{
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Queue<T>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(inner: Arc<Self>, items: Vec<QueueItem<T>>) {
        inner.batches_flushed.fetch_add(1, Ordering::Relaxed);
        inner.largest_batch.fetch_max(items.len(), Ordering::Relaxed);
        drop(inner);

        join_all(items.into_iter().map(|item| async move {
            let result = (item.work)().await;
            if let Err(err) = &result {
                debug!(item = %item.item_key, error = %err, "batched item failed");
            }
            // Receiver gone means the caller stopped waiting.
            let _ = item.reply.send(result);
        }))
        .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support::settle;
    use std::sync::atomic::AtomicUsize;

    fn spawn_lookup(
        scheduler: &BatchScheduler<i64>,
        id: i64,
    ) -> tokio::task::JoinHandle<Result<i64>> {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .enqueue("instances", id.to_string(), move || async move { Ok(id * 10) })
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_flushes_without_waiting() {
        // Given: A batch size of three
        let scheduler = BatchScheduler::new(3, Duration::from_secs(60));

        // When: Three items arrive
        let handles: Vec<_> = (1..=3).map(|id| spawn_lookup(&scheduler, id)).collect();
        settle().await;

        // Then: They resolved with no time passing
        for (handle, id) in handles.into_iter().zip(1..) {
            assert!(handle.is_finished());
            assert_eq!(handle.await.unwrap().unwrap(), id * 10);
        }
        let stats = scheduler.stats();
        assert_eq!(stats.batches_flushed, 1);
        assert_eq!(stats.largest_batch, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_never_exceed_max_size() {
        let scheduler = BatchScheduler::new(3, Duration::from_millis(50));

        let handles: Vec<_> = (1..=7).map(|id| spawn_lookup(&scheduler, id)).collect();
        settle().await;

        // Two full batches ran; the seventh item waits for the timer
        assert_eq!(scheduler.queue_depths().get("instances"), Some(&1));

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        let stats = scheduler.stats();
        assert_eq!(stats.batches_flushed, 3);
        assert_eq!(stats.largest_batch, 3);
        assert!(stats.queue_depths.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_flushes_after_delay() {
        let scheduler = BatchScheduler::new(10, Duration::from_millis(50));

        let first = spawn_lookup(&scheduler, 1);
        settle().await;
        tokio::time::advance(Duration::from_millis(20)).await;
        let second = spawn_lookup(&scheduler, 2);
        settle().await;

        // The window is measured from the first enqueue
        tokio::time::advance(Duration::from_millis(29)).await;
        settle().await;
        assert!(!first.is_finished());
        assert_eq!(scheduler.queue_depths().get("instances"), Some(&2));

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(first.await.unwrap().unwrap(), 10);
        assert_eq!(second.await.unwrap().unwrap(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_fail_siblings() {
        let scheduler: BatchScheduler<i64> = BatchScheduler::new(2, Duration::from_millis(50));

        let ok = spawn_lookup(&scheduler, 1);
        let failing = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .enqueue("instances", "2", || async {
                        Err(Error::from_status(404, "Instance with id 2 not found"))
                    })
                    .await
            })
        };
        settle().await;

        assert_eq!(ok.await.unwrap().unwrap(), 10);
        assert!(matches!(failing.await.unwrap(), Err(Error::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_item_key_settles_by_own_work() {
        // Given: Two callers queue item "7" in one window, the second failing
        let scheduler: BatchScheduler<i64> = BatchScheduler::new(10, Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));
        let spawn_seven = |outcome: Result<i64>| {
            let scheduler = scheduler.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                scheduler
                    .enqueue("instances", "7", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        outcome
                    })
                    .await
            })
        };
        let ok = spawn_seven(Ok(70));
        let failing = spawn_seven(Err(Error::from_status(404, "Instance with id 7 not found")));
        settle().await;
        assert_eq!(scheduler.queue_depths().get("instances"), Some(&2));

        // When: The window elapses
        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;

        // Then: Each caller got its own work's outcome
        assert_eq!(ok.await.unwrap().unwrap(), 70);
        assert!(matches!(failing.await.unwrap(), Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.stats().batches_flushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_waiting_callers() {
        let scheduler = BatchScheduler::new(10, Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));

        let waiting = {
            let scheduler = scheduler.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                scheduler
                    .enqueue("instances", "1", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    })
                    .await
            })
        };
        settle().await;

        assert_eq!(scheduler.clear(), 1);
        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(matches!(waiting.await.unwrap(), Err(Error::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(scheduler.queue_depths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_runs_pending_batches() {
        let scheduler = BatchScheduler::new(10, Duration::from_secs(60));
        let handle = spawn_lookup(&scheduler, 4);
        settle().await;

        scheduler.flush_all().await;

        assert_eq!(handle.await.unwrap().unwrap(), 40);
    }

    #[tokio::test]
    async fn test_disabled_runs_directly() {
        let scheduler = BatchScheduler::disabled();
        let value = scheduler
            .enqueue("instances", "5", || async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert!(scheduler.queue_depths().is_empty());
        assert_eq!(scheduler.stats().batches_flushed, 0);
    }
}
