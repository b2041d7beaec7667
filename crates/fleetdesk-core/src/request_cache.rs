//! Time-windowed request deduplication.
//!
//! [`RequestCache::get_or_create`] guarantees at most one outstanding
//! operation per [`CacheKey`]: the first caller's factory produces a shared
//! future, and every caller arriving while that future is pending, or within
//! the TTL window after it settled, receives a clone of the same result.
//!
//! The TTL is measured from insertion. Reads never extend it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;
use crate::clock::{SharedClock, system_clock};
use crate::key::{CacheKey, ResourceRef};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Entry<T: Clone> {
    future: SharedResult<T>,
    inserted_at: Instant,
    ttl: Duration,
    generation: u64,
    refs: Vec<ResourceRef>,
}

impl<T: Clone> Entry<T> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.inserted_at + self.ttl
    }
}

/// Counters exposed through `stats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Deduplicating cache of in-flight and recently completed requests.
pub struct RequestCache<T: Clone> {
    entries: Mutex<HashMap<CacheKey, Entry<T>>>,
    clock: SharedClock,
    default_ttl: Duration,
    enabled: bool,
    cache_failures: bool,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T> std::fmt::Debug for RequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("default_ttl", &self.default_ttl)
            .field("enabled", &self.enabled)
            .field("cache_failures", &self.cache_failures)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T> RequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an enabled cache that also remembers failures.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock: system_clock(),
            default_ttl,
            enabled: true,
            cache_failures: true,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Use `clock` for TTL checks.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Disabled caches call the factory on every request.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether failed results are kept for the TTL window.
    #[must_use]
    pub const fn cache_failures(mut self, cache_failures: bool) -> Self {
        self.cache_failures = cache_failures;
        self
    }

    /// Window applied by [`RequestCache::get_or_create`].
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the live result for `key`, or run `factory` once and share its
    /// result with every concurrent and subsequent caller for the default TTL.
    ///
    /// # Errors
    ///
    /// Returns the (possibly shared) error produced by the factory.
    pub async fn get_or_create<F, Fut>(&self, key: CacheKey, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.get_or_create_with_ttl(key, self.default_ttl, factory)
            .await
    }

    /// [`RequestCache::get_or_create`] with an explicit TTL for a new entry.
    ///
    /// # Errors
    ///
    /// Returns the (possibly shared) error produced by the factory.
    pub async fn get_or_create_with_ttl<F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        factory: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.enabled {
            return factory().await;
        }

        let (future, generation) = {
            let mut entries = self.lock();
            let now = self.clock.now();
            match entries.get(&key) {
                Some(entry) if entry.is_live(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "request cache hit");
                    (entry.future.clone(), entry.generation)
                },
                _ => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "request cache miss");
                    entries.retain(|_, entry| entry.is_live(now));
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let future = factory().boxed().shared();
                    entries.insert(
                        key.clone(),
                        Entry {
                            future: future.clone(),
                            inserted_at: now,
                            ttl,
                            generation,
                            refs: key.references().iter().copied().collect(),
                        },
                    );
                    (future, generation)
                },
            }
        };

        let result = future.await;
        if result.is_err() && !self.cache_failures {
            self.remove_generation(&key, generation);
        }
        result
    }

    fn remove_generation(&self, key: &CacheKey, generation: u64) {
        let mut entries = self.lock();
        if entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(key);
        }
    }

    /// Drop every entry that depends on `resource`. Returns how many were removed.
    pub fn invalidate(&self, resource: ResourceRef) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.refs.contains(&resource));
        before - entries.len()
    }

    /// Drop one key.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        self.lock().get(key).is_some_and(|entry| entry.is_live(now))
    }

    /// Drop everything. Callers already awaiting a shared future still receive
    /// its result.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.is_live(now));
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RequestCacheStats {
        RequestCacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
