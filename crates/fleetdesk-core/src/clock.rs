//! Time sources and cancellable timers.
//!
//! Every component that reasons about age (TTL checks, eviction order) reads
//! time through a [`Clock`], and every component that defers work does so with
//! [`schedule`], which returns a [`TimerHandle`]. Both are built on
//! `tokio::time`, so a test running under a paused runtime
//! (`#[tokio::test(start_paused = true)]`) controls them with
//! `tokio::time::advance`. [`ManualClock`] is available for synchronous tests
//! that never enter a runtime.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Source of the current instant.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> Instant;
}

/// Clock backed by `tokio::time::Instant`.
///
/// Follows the runtime's virtual time when the runtime is paused.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for synchronous tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Default clock used when none is injected.
pub fn system_clock() -> SharedClock {
    Arc::new(TokioClock)
}

/// Handle to a scheduled timer.
///
/// Cancelling aborts the timer task; its callback never runs afterwards.
/// Dropping the handle does *not* cancel the timer.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Abort the timer. Idempotent.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Returns `true` once the timer has fired or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Run `callback` after `delay` on the current tokio runtime.
///
/// Must be called from within a runtime.
pub fn schedule<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    schedule_async(delay, async move { callback() })
}

/// Await `task` after `delay` on the current tokio runtime.
pub fn schedule_async<Fut>(delay: Duration, task: Fut) -> TimerHandle
where
    Fut: Future<Output = ()> + Send + 'static,
{
    // Deadline is fixed at scheduling time, not at the task's first poll.
    let deadline = Instant::now() + delay;
    let handle = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        task.await;
    });
    TimerHandle {
        abort: handle.abort_handle(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::settle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_callback_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let _timer = schedule(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(99)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timer = schedule(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.cancel();
        timer.cancel();
        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock;
        let start = clock.now();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(clock.now() - start >= Duration::from_secs(5));
    }
}
