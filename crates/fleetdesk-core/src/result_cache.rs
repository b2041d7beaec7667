//! Size-bounded result caches with per-class TTLs.
//!
//! [`ResultCache`] stores settled values only, each with its own TTL and the
//! resource references of its key. When the entry count exceeds the
//! configured maximum, the oldest fifth (at least one entry) by insertion
//! time is evicted. Reads do not refresh an entry's age.
//!
//! Every invalidation advances an epoch recorded per resource. A fetch that
//! started before an invalidation of any resource its key references is not
//! stored when it settles, so a read racing a write cannot put the pre-write
//! value back.
//!
//! [`TieredCache`] pairs a primary cache for query results with a secondary
//! cache for search results. Any mutation purges the primary entries that
//! reference the mutated resource and empties the search tier.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::Result;
use crate::clock::{SharedClock, system_clock};
use crate::config::ResultCacheConfig;
use crate::key::{CacheKey, ResourceRef};

/// Freshness class of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    /// Aggregate counts.
    Count,
    /// "Most recent record" lookups.
    Latest,
    /// Pages of a listing.
    ListPage,
    /// Lookups of records that never change once written.
    Point,
    /// Search results.
    Search,
}

/// TTL per [`DataClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub count: Duration,
    pub latest: Duration,
    pub list_page: Duration,
    pub point: Duration,
    pub search: Duration,
}

impl TtlPolicy {
    pub const fn ttl(&self, class: DataClass) -> Duration {
        match class {
            DataClass::Count => self.count,
            DataClass::Latest => self.latest,
            DataClass::ListPage => self.list_page,
            DataClass::Point => self.point,
            DataClass::Search => self.search,
        }
    }
}

impl From<&ResultCacheConfig> for TtlPolicy {
    fn from(config: &ResultCacheConfig) -> Self {
        Self {
            count: Duration::from_millis(config.count_ttl_ms),
            latest: Duration::from_millis(config.latest_ttl_ms),
            list_page: Duration::from_millis(config.list_ttl_ms),
            point: Duration::from_millis(config.point_ttl_ms),
            search: Duration::from_millis(config.search_ttl_ms),
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from(&ResultCacheConfig::default())
    }
}

struct Stored<V> {
    value: V,
    inserted_at: Instant,
    sequence: u64,
    ttl: Duration,
    refs: Vec<ResourceRef>,
}

impl<V> Stored<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.inserted_at + self.ttl
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultCacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl ResultCacheStats {
    /// Hits over total lookups, 0.0 when there were none.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Last invalidation epoch of each resource, and of the last full clear.
#[derive(Default)]
struct Epochs {
    current: u64,
    cleared: u64,
    by_resource: HashMap<ResourceRef, u64>,
}

impl Epochs {
    fn advance(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    fn invalidated_since(&self, refs: &[ResourceRef], epoch: u64) -> bool {
        self.cleared > epoch
            || refs
                .iter()
                .any(|r| self.by_resource.get(r).is_some_and(|&at| at > epoch))
    }
}

/// Bounded cache of settled values.
pub struct ResultCache<V> {
    entries: Mutex<HashMap<CacheKey, Stored<V>>>,
    epochs: Mutex<Epochs>,
    clock: SharedClock,
    max_entries: usize,
    enabled: bool,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("max_entries", &self.max_entries)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> ResultCache<V> {
    /// Create an enabled cache holding at most `max_entries` (at least one).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            epochs: Mutex::new(Epochs::default()),
            clock: system_clock(),
            max_entries: max_entries.max(1),
            enabled: true,
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// A disabled cache never stores anything.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Stored<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Always taken after `entries` when both are held.
    fn lock_epochs(&self) -> MutexGuard<'_, Epochs> {
        self.epochs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current invalidation epoch. Pass it to [`ResultCache::insert_since`]
    /// for a value fetched after this call.
    pub fn epoch(&self) -> u64 {
        self.lock_epochs().current
    }

    /// Live value for `key`. Expired entries are removed on the way.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let now = self.clock.now();
        let mut entries = self.lock();
        let found = match entries.get(key) {
            Some(stored) if stored.is_live(now) => Some(stored.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            },
            None => None,
        };
        drop(entries);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "result cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store `value` under `key` for `ttl`, evicting the oldest entries when
    /// the cache grows past its bound.
    pub fn insert(&self, key: CacheKey, value: V, ttl: Duration) {
        self.store(key, value, ttl, None);
    }

    /// Like [`ResultCache::insert`], but only if nothing `key` references was
    /// invalidated (and the cache was not cleared) after `epoch`. Returns
    /// whether the value was stored.
    pub fn insert_since(&self, key: CacheKey, value: V, ttl: Duration, epoch: u64) -> bool {
        self.store(key, value, ttl, Some(epoch))
    }

    fn store(&self, key: CacheKey, value: V, ttl: Duration, since: Option<u64>) -> bool {
        if !self.enabled {
            return false;
        }
        let now = self.clock.now();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let refs: Vec<ResourceRef> = key.references().iter().copied().collect();
        let mut entries = self.lock();
        if since.is_some_and(|epoch| self.lock_epochs().invalidated_since(&refs, epoch)) {
            debug!(key = %key, "result invalidated while in flight, not cached");
            return false;
        }
        entries.retain(|_, stored| stored.is_live(now));
        entries.insert(
            key,
            Stored {
                value,
                inserted_at: now,
                sequence,
                ttl,
                refs,
            },
        );

        if entries.len() > self.max_entries {
            let evicted = Self::evict_oldest(&mut entries);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, remaining = entries.len(), "result cache evicted oldest entries");
        }
        true
    }

    fn evict_oldest(entries: &mut HashMap<CacheKey, Stored<V>>) -> usize {
        let count = (entries.len() / 5).max(1);
        let mut by_age: Vec<(Instant, u64, CacheKey)> = entries
            .iter()
            .map(|(key, stored)| (stored.inserted_at, stored.sequence, key.clone()))
            .collect();
        by_age.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        for (_, _, key) in by_age.into_iter().take(count) {
            entries.remove(&key);
        }
        count
    }

    /// Return the cached value or await `fetch` and store its success.
    ///
    /// The value is returned but not stored when a resource it depends on was
    /// invalidated while `fetch` was pending.
    ///
    /// # Errors
    ///
    /// Returns the error from `fetch`; errors are never cached.
    pub async fn get_or_fetch<Fut>(&self, key: CacheKey, ttl: Duration, fetch: Fut) -> Result<V>
    where
        Fut: Future<Output = Result<V>>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let epoch = self.epoch();
        let value = fetch.await?;
        self.insert_since(key, value.clone(), ttl, epoch);
        Ok(value)
    }

    /// Remove every entry whose key references `resource`.
    pub fn invalidate(&self, resource: ResourceRef) -> usize {
        let mut entries = self.lock();
        {
            let mut epochs = self.lock_epochs();
            let at = epochs.advance();
            epochs.by_resource.insert(resource, at);
        }
        let before = entries.len();
        entries.retain(|_, stored| !stored.refs.contains(&resource));
        before - entries.len()
    }

    /// Remove everything. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        {
            let mut epochs = self.lock_epochs();
            epochs.cleared = epochs.advance();
        }
        let count = entries.len();
        entries.clear();
        count
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        entries.retain(|_, stored| stored.is_live(now));
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ResultCacheStats {
        ResultCacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Entries removed by one invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Invalidation {
    pub primary: usize,
    pub search: usize,
}

/// Stats for both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TieredStats {
    pub primary: ResultCacheStats,
    pub search: ResultCacheStats,
}

/// Primary query cache plus search-result cache.
#[derive(Debug)]
pub struct TieredCache<V, S> {
    primary: ResultCache<V>,
    search: ResultCache<S>,
    ttl: TtlPolicy,
}

impl<V: Clone, S: Clone> TieredCache<V, S> {
    pub fn new(primary: ResultCache<V>, search: ResultCache<S>, ttl: TtlPolicy) -> Self {
        Self {
            primary,
            search,
            ttl,
        }
    }

    /// Build both tiers from configuration.
    pub fn from_config(config: &ResultCacheConfig, clock: &SharedClock) -> Self {
        Self::new(
            ResultCache::new(config.max_entries)
                .with_clock(SharedClock::clone(clock))
                .enabled(config.enabled),
            ResultCache::new(config.search_max_entries)
                .with_clock(SharedClock::clone(clock))
                .enabled(config.enabled),
            TtlPolicy::from(config),
        )
    }

    pub const fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub const fn primary(&self) -> &ResultCache<V> {
        &self.primary
    }

    pub const fn search(&self) -> &ResultCache<S> {
        &self.search
    }

    /// Primary-tier lookup, fetching and storing on a miss.
    ///
    /// # Errors
    ///
    /// Returns the error from `fetch`; errors are never cached.
    pub async fn get_or_fetch<Fut>(&self, key: CacheKey, class: DataClass, fetch: Fut) -> Result<V>
    where
        Fut: Future<Output = Result<V>>,
    {
        self.primary
            .get_or_fetch(key, self.ttl.ttl(class), fetch)
            .await
    }

    pub fn get_search(&self, key: &CacheKey) -> Option<S> {
        self.search.get(key)
    }

    /// Epoch to pair with [`TieredCache::put_search`].
    pub fn search_epoch(&self) -> u64 {
        self.search.epoch()
    }

    /// Store search results computed from data read after `epoch`. Skipped
    /// if the search tier was emptied in the meantime.
    pub fn put_search(&self, key: CacheKey, results: S, epoch: u64) -> bool {
        self.search
            .insert_since(key, results, self.ttl.ttl(DataClass::Search), epoch)
    }

    /// Purge everything depending on `resource` and empty the search tier.
    pub fn invalidate(&self, resource: ResourceRef) -> Invalidation {
        let report = Invalidation {
            primary: self.primary.invalidate(resource),
            search: self.search.clear(),
        };
        info!(
            resource = %resource,
            primary = report.primary,
            search = report.search,
            "invalidated cached results"
        );
        report
    }

    pub fn clear(&self) {
        self.primary.clear();
        self.search.clear();
    }

    pub fn stats(&self) -> TieredStats {
        TieredStats {
            primary: self.primary.stats(),
            search: self.search.stats(),
        }
    }
}
