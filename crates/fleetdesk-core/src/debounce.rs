//! Trailing-edge debouncing with a maximum wait.
//!
//! A [`Debouncer`] wraps a function. Each [`Debouncer::call`] stores the
//! latest arguments and restarts the trailing timer; the function is invoked
//! once, with the last arguments, after `delay` of quiet. When `max_wait` is
//! set, a second timer started by the first call of a window forces the
//! invocation even if calls never stop arriving.
//!
//! [`DebounceRegistry`] tracks debouncers by key so they can be flushed,
//! cancelled or counted together.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::debug;

use crate::clock::{TimerHandle, schedule};

type Callback<A> = Box<dyn Fn(A) + Send + Sync>;

struct Pending<A> {
    args: A,
    window: u64,
    call: u64,
    trailing: TimerHandle,
    max_wait: Option<TimerHandle>,
}

impl<A> Pending<A> {
    fn cancel_timers(&self) {
        self.trailing.cancel();
        if let Some(timer) = &self.max_wait {
            timer.cancel();
        }
    }
}

#[derive(Clone, Copy)]
enum Trigger {
    Trailing(u64),
    MaxWait(u64),
}

struct Shared<A> {
    key: String,
    delay: Duration,
    max_wait: Option<Duration>,
    callback: Callback<A>,
    pending: Mutex<Option<Pending<A>>>,
    sequence: AtomicU64,
    forwarded: AtomicU64,
}

impl<A: Send + 'static> Shared<A> {
    fn lock(&self) -> MutexGuard<'_, Option<Pending<A>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, trigger: Trigger) {
        let due = {
            let mut pending = self.lock();
            let matches = pending.as_ref().is_some_and(|p| match trigger {
                Trigger::Trailing(call) => p.call == call,
                Trigger::MaxWait(window) => p.window == window,
            });
            if matches { pending.take() } else { None }
        };
        if let Some(due) = due {
            due.cancel_timers();
            self.forward(due.args);
        }
    }

    fn forward(&self, args: A) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        debug!(key = %self.key, "debounced call forwarded");
        (self.callback)(args);
    }
}

/// Coalesces bursts of calls into one trailing invocation.
///
/// Cloning yields another handle to the same pending state.
pub struct Debouncer<A> {
    shared: Arc<Shared<A>>,
}

impl<A> Clone for Debouncer<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A> fmt::Debug for Debouncer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("key", &self.shared.key)
            .field("delay", &self.shared.delay)
            .field("max_wait", &self.shared.max_wait)
            .finish_non_exhaustive()
    }
}

impl<A: Send + 'static> Debouncer<A> {
    /// Wrap `callback`. A `max_wait` shorter than `delay` is raised to `delay`.
    pub fn new<F>(
        key: impl Into<String>,
        delay: Duration,
        max_wait: Option<Duration>,
        callback: F,
    ) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                key: key.into(),
                delay,
                max_wait: max_wait.map(|wait| wait.max(delay)),
                callback: Box::new(callback),
                pending: Mutex::new(None),
                sequence: AtomicU64::new(0),
                forwarded: AtomicU64::new(0),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Record `args` as the latest call and restart the trailing timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call(&self, args: A) {
        let shared = &self.shared;
        let call = shared.sequence.fetch_add(1, Ordering::Relaxed);
        let trailing = self.start_timer(shared.delay, Trigger::Trailing(call));

        let mut pending = shared.lock();
        match pending.as_mut() {
            Some(current) => {
                current.trailing.cancel();
                current.trailing = trailing;
                current.call = call;
                current.args = args;
            },
            None => {
                let max_wait = shared
                    .max_wait
                    .map(|wait| self.start_timer(wait, Trigger::MaxWait(call)));
                *pending = Some(Pending {
                    args,
                    window: call,
                    call,
                    trailing,
                    max_wait,
                });
            },
        }
    }

    fn start_timer(&self, delay: Duration, trigger: Trigger) -> TimerHandle {
        let weak: Weak<Shared<A>> = Arc::downgrade(&self.shared);
        schedule(delay, move || {
            if let Some(shared) = weak.upgrade() {
                shared.fire(trigger);
            }
        })
    }

    /// Discard the pending invocation. Returns `false` when nothing was pending.
    pub fn cancel(&self) -> bool {
        let taken = self.shared.lock().take();
        taken.is_some_and(|pending| {
            pending.cancel_timers();
            true
        })
    }

    /// Invoke the pending call now. Returns `false` when nothing was pending.
    pub fn flush(&self) -> bool {
        let taken = self.shared.lock().take();
        match taken {
            Some(pending) => {
                pending.cancel_timers();
                self.shared.forward(pending.args);
                true
            },
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().is_some()
    }

    /// How many times the wrapped function has been invoked.
    pub fn forwarded(&self) -> u64 {
        self.shared.forwarded.load(Ordering::Relaxed)
    }
}

/// Type-erased control surface used by [`DebounceRegistry`].
pub trait DebounceControl: Send + Sync {
    fn key(&self) -> &str;
    fn cancel(&self) -> bool;
    fn flush(&self) -> bool;
    fn is_pending(&self) -> bool;
}

impl<A: Send + 'static> DebounceControl for Debouncer<A> {
    fn key(&self) -> &str {
        Self::key(self)
    }

    fn cancel(&self) -> bool {
        Self::cancel(self)
    }

    fn flush(&self) -> bool {
        Self::flush(self)
    }

    fn is_pending(&self) -> bool {
        Self::is_pending(self)
    }
}

/// Debouncers by key. At most one per key.
#[derive(Default)]
pub struct DebounceRegistry {
    entries: Mutex<BTreeMap<String, Arc<dyn DebounceControl>>>,
}

impl fmt::Debug for DebounceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl DebounceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<dyn DebounceControl>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `debouncer`. A previous debouncer under the same key is
    /// cancelled and replaced.
    pub fn register<A: Send + 'static>(&self, debouncer: Debouncer<A>) -> Debouncer<A> {
        let control: Arc<dyn DebounceControl> = Arc::new(debouncer.clone());
        let previous = self.lock().insert(debouncer.key().to_string(), control);
        if let Some(previous) = previous {
            previous.cancel();
        }
        debouncer
    }

    /// Stop tracking `key`, cancelling any pending call.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        removed.is_some_and(|control| {
            control.cancel();
            true
        })
    }

    pub fn cancel(&self, key: &str) -> bool {
        let control = self.lock().get(key).cloned();
        control.is_some_and(|c| c.cancel())
    }

    pub fn flush(&self, key: &str) -> bool {
        let control = self.lock().get(key).cloned();
        control.is_some_and(|c| c.flush())
    }

    /// Flush every pending call. Returns how many were forwarded.
    pub fn flush_all(&self) -> usize {
        let controls: Vec<_> = self.lock().values().cloned().collect();
        controls.iter().filter(|c| c.flush()).count()
    }

    /// Cancel every pending call and forget all debouncers.
    pub fn clear(&self) {
        let controls = std::mem::take(&mut *self.lock());
        for control in controls.values() {
            control.cancel();
        }
    }

    /// Number of registered debounced functions.
    pub fn live(&self) -> usize {
        self.lock().len()
    }

    /// Number with a call waiting to be forwarded.
    pub fn pending(&self) -> usize {
        let controls: Vec<_> = self.lock().values().cloned().collect();
        controls.iter().filter(|c| c.is_pending()).count()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support::settle;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Send + Sync + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |value| sink.lock().unwrap().push(value))
    }

    async fn advance_ms(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_forwards_last_arguments_once() {
        // Given: A 300ms debounce
        let (calls, sink) = recorder();
        let debouncer = Debouncer::new("search", Duration::from_millis(300), None, sink);

        // When: Three calls arrive 100ms apart
        debouncer.call(1);
        advance_ms(100).await;
        debouncer.call(2);
        advance_ms(100).await;
        debouncer.call(3);

        // Then: Nothing is forwarded until 300ms after the last call
        advance_ms(299).await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(debouncer.is_pending());

        advance_ms(1).await;
        assert_eq!(*calls.lock().unwrap(), vec![3]);
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.forwarded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_bounds_total_delay() {
        let (calls, sink) = recorder();
        let debouncer = Debouncer::new(
            "filter",
            Duration::from_millis(100),
            Some(Duration::from_millis(250)),
            sink,
        );

        // Calls every 50ms would keep resetting the trailing timer forever
        for i in 0..5 {
            debouncer.call(i);
            advance_ms(50).await;
        }

        assert_eq!(*calls.lock().unwrap(), vec![4]);

        // The next call opens a fresh window
        debouncer.call(9);
        advance_ms(100).await;
        assert_eq!(*calls.lock().unwrap(), vec![4, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_and_is_idempotent() {
        let (calls, sink) = recorder();
        let debouncer = Debouncer::new("k", Duration::from_millis(100), None, sink);

        debouncer.call(1);
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        advance_ms(500).await;
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_forwards_immediately_once() {
        let (calls, sink) = recorder();
        let debouncer = Debouncer::new(
            "k",
            Duration::from_millis(100),
            Some(Duration::from_millis(200)),
            sink,
        );

        debouncer.call(1);
        debouncer.call(2);
        assert!(debouncer.flush());
        assert!(!debouncer.flush());
        assert_eq!(*calls.lock().unwrap(), vec![2]);

        // Timers from the flushed window never fire
        advance_ms(500).await;
        assert_eq!(*calls.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_replaces_and_counts() {
        let registry = DebounceRegistry::new();
        let (first_calls, first_sink) = recorder();
        let (second_calls, second_sink) = recorder();

        let first = registry.register(Debouncer::new(
            "instances:search",
            Duration::from_millis(100),
            None,
            first_sink,
        ));
        first.call(1);
        assert_eq!(registry.pending(), 1);

        // Replacing under the same key cancels the old pending call
        let second = registry.register(Debouncer::new(
            "instances:search",
            Duration::from_millis(100),
            None,
            second_sink,
        ));
        second.call(2);
        assert_eq!(registry.live(), 1);

        advance_ms(100).await;
        assert!(first_calls.lock().unwrap().is_empty());
        assert_eq!(*second_calls.lock().unwrap(), vec![2]);

        second.call(3);
        registry.clear();
        advance_ms(100).await;
        assert_eq!(*second_calls.lock().unwrap(), vec![2]);
        assert_eq!(registry.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_flush_all() {
        let registry = DebounceRegistry::new();
        let (calls, sink) = recorder();
        let debouncer = registry.register(Debouncer::new("a", Duration::from_secs(10), None, sink));

        debouncer.call(5);
        assert_eq!(registry.flush_all(), 1);
        assert_eq!(*calls.lock().unwrap(), vec![5]);
        assert_eq!(registry.flush_all(), 0);
    }
}
