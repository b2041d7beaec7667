//! The data-access facade.
//!
//! [`DataAccess`] is what the console talks to. Reads flow through the
//! tiered result cache, then the request cache (deduplicating concurrent and
//! recent identical calls), then, for single-instance lookups, the batch
//! scheduler, before reaching the backend. Writes go straight to the backend
//! and invalidate every cached entry that depends on what they touched.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, join_all};
use serde::Serialize;
use tracing::info;

use crate::backend::InstanceBackend;
use crate::batch::{BatchScheduler, BatchStats};
use crate::clock::{SharedClock, system_clock};
use crate::config::Config;
use crate::debounce::{DebounceRegistry, Debouncer};
use crate::filter::{ExtendedFilterCriteria, filter};
use crate::key::{CacheKey, ResourceRef};
use crate::request_cache::{RequestCache, RequestCacheStats};
use crate::result_cache::{DataClass, Invalidation, TieredCache, TieredStats};
use crate::search::{RankedRecord, SearchOptions, SearchResult, search, suggestions};
use crate::types::{CopyRequest, HistoryQuery, HistoryRecord, Instance, InstanceQuery, Page};
use crate::{Error, Result};

const INSTANCE_BATCH: &str = "instances";

/// Any value the facade caches.
#[derive(Debug, Clone)]
pub enum Cached {
    Instances(Page<Instance>),
    Instance(Instance),
    History(Page<HistoryRecord>),
    HistoryRecord(HistoryRecord),
    Latest(Option<HistoryRecord>),
    Count(u64),
}

/// Owned search results held by the search tier.
#[derive(Debug, Clone)]
pub enum SearchHits {
    Instances(Vec<RankedRecord<Instance>>),
    History(Vec<RankedRecord<HistoryRecord>>),
}

/// Snapshot of every cache, queue and debouncer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataAccessStats {
    pub request_cache: RequestCacheStats,
    pub result_cache: TieredStats,
    pub batches: BatchStats,
    pub debounced: usize,
    pub debounce_pending: usize,
}

/// Cached, batched and deduplicated access to the instance backend.
pub struct DataAccess<B: InstanceBackend> {
    backend: Arc<B>,
    config: Config,
    requests: RequestCache<Cached>,
    list_ttl: Duration,
    batches: BatchScheduler<Instance>,
    results: TieredCache<Cached, SearchHits>,
    debouncers: DebounceRegistry,
}

impl<B: InstanceBackend> std::fmt::Debug for DataAccess<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("requests", &self.requests)
            .field("batches", &self.batches)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

impl<B: InstanceBackend> DataAccess<B> {
    pub fn new(backend: B, config: Config) -> Self {
        Self::with_clock(backend, config, system_clock())
    }

    /// Build with an injected clock for TTL checks.
    pub fn with_clock(backend: B, config: Config, clock: SharedClock) -> Self {
        let requests = RequestCache::new(Duration::from_millis(config.request_cache.item_ttl_ms))
            .with_clock(SharedClock::clone(&clock))
            .enabled(config.request_cache.enabled)
            .cache_failures(config.request_cache.cache_failures);
        let batches = if config.batch.enabled {
            BatchScheduler::new(
                config.batch.max_batch_size,
                Duration::from_millis(config.batch.batch_delay_ms),
            )
        } else {
            BatchScheduler::disabled()
        };
        Self {
            backend: Arc::new(backend),
            list_ttl: Duration::from_millis(config.request_cache.list_ttl_ms),
            results: TieredCache::from_config(&config.result_cache, &clock),
            requests,
            batches,
            debouncers: DebounceRegistry::new(),
            config,
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn read<T>(
        &self,
        key: CacheKey,
        class: DataClass,
        request_ttl: Duration,
        fetch: BoxFuture<'static, Result<Cached>>,
        extract: fn(Cached) -> Option<T>,
    ) -> Result<T> {
        let request = self
            .requests
            .get_or_create_with_ttl(key.clone(), request_ttl, move || fetch);
        let value = self.results.get_or_fetch(key.clone(), class, request).await?;
        extract(value).ok_or_else(|| Error::Other(format!("unexpected cached value for {key}")))
    }

    // Reads

    /// One page of instances.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn list_instances(&self, query: &InstanceQuery) -> Result<Page<Instance>> {
        let key = CacheKey::builder("list", "/api/instances")
            .params_from(query)?
            .references(ResourceRef::InstanceCollection)
            .build();
        let backend = Arc::clone(&self.backend);
        let query = query.clone();
        let fetch = async move { backend.list_instances(&query).await.map(Cached::Instances) };
        self.read(key, DataClass::ListPage, self.list_ttl, fetch.boxed(), |v| match v {
            Cached::Instances(page) => Some(page),
            _ => None,
        })
        .await
    }

    /// One instance, fetched through the batch scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown ids, or the backend's error.
    pub async fn get_instance(&self, id: i64) -> Result<Instance> {
        let key = CacheKey::builder("get", &format!("/api/instances/{id}"))
            .references(ResourceRef::Instance(id))
            .build();
        let backend = Arc::clone(&self.backend);
        let batches = self.batches.clone();
        let fetch = async move {
            batches
                .enqueue(INSTANCE_BATCH, id.to_string(), move || async move {
                    backend.get_instance(id).await
                })
                .await
                .map(Cached::Instance)
        };
        self.read(
            key,
            DataClass::ListPage,
            self.requests.default_ttl(),
            fetch.boxed(),
            |v| match v {
                Cached::Instance(instance) => Some(instance),
                _ => None,
            },
        )
        .await
    }

    /// Several instances in one batch window. Each id settles independently.
    pub async fn get_instances(&self, ids: &[i64]) -> Vec<Result<Instance>> {
        join_all(ids.iter().map(|id| self.get_instance(*id))).await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no instance has `name`.
    pub async fn get_instance_by_name(&self, name: &str) -> Result<Instance> {
        let key = CacheKey::builder("get", "/api/instances/name")
            .param("name", name)
            .references(ResourceRef::InstanceCollection)
            .build();
        let backend = Arc::clone(&self.backend);
        let name = name.to_string();
        let fetch = async move { backend.get_instance_by_name(&name).await.map(Cached::Instance) };
        self.read(
            key,
            DataClass::ListPage,
            self.requests.default_ttl(),
            fetch.boxed(),
            |v| match v {
                Cached::Instance(instance) => Some(instance),
                _ => None,
            },
        )
        .await
    }

    /// One page of history, for one instance or across all of them.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn list_history(&self, query: &HistoryQuery) -> Result<Page<HistoryRecord>> {
        let mut key = CacheKey::builder("list", "/api/history")
            .params_from(query)?
            .references(ResourceRef::HistoryCollection);
        if let Some(id) = query.instance_id {
            key = key.references(ResourceRef::Instance(id));
        }
        let backend = Arc::clone(&self.backend);
        let query = query.clone();
        let fetch = async move { backend.list_history(&query).await.map(Cached::History) };
        self.read(key.build(), DataClass::ListPage, self.list_ttl, fetch.boxed(), |v| {
            match v {
                Cached::History(page) => Some(page),
                _ => None,
            }
        })
        .await
    }

    /// A single history record. History is append-only, so these are cached
    /// for the long point-lookup TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown ids.
    pub async fn get_history(&self, history_id: i64) -> Result<HistoryRecord> {
        let key = CacheKey::builder("get", &format!("/api/history/{history_id}"))
            .references(ResourceRef::History(history_id))
            .build();
        let backend = Arc::clone(&self.backend);
        let fetch = async move {
            backend
                .get_history(history_id)
                .await
                .map(Cached::HistoryRecord)
        };
        self.read(
            key,
            DataClass::Point,
            self.requests.default_ttl(),
            fetch.boxed(),
            |v| match v {
                Cached::HistoryRecord(record) => Some(record),
                _ => None,
            },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn latest_history(&self, instance_id: i64) -> Result<Option<HistoryRecord>> {
        let key = CacheKey::builder("latest", &format!("/api/instances/{instance_id}/history"))
            .references(ResourceRef::Instance(instance_id))
            .references(ResourceRef::HistoryCollection)
            .build();
        let backend = Arc::clone(&self.backend);
        let fetch = async move {
            backend
                .latest_history(instance_id)
                .await
                .map(Cached::Latest)
        };
        self.read(key, DataClass::Latest, self.list_ttl, fetch.boxed(), |v| match v {
            Cached::Latest(record) => Some(record),
            _ => None,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn history_count(&self, instance_id: i64) -> Result<u64> {
        let key = CacheKey::builder("count", &format!("/api/instances/{instance_id}/history"))
            .references(ResourceRef::Instance(instance_id))
            .references(ResourceRef::HistoryCollection)
            .build();
        let backend = Arc::clone(&self.backend);
        let fetch = async move { backend.history_count(instance_id).await.map(Cached::Count) };
        self.read(key, DataClass::Count, self.list_ttl, fetch.boxed(), |v| match v {
            Cached::Count(count) => Some(count),
            _ => None,
        })
        .await
    }

    // Writes

    /// # Errors
    ///
    /// Returns the backend's rejection (conflict, validation, ...).
    pub async fn create_instance(&self, instance: &Instance) -> Result<Instance> {
        let created = self.backend.create_instance(instance).await?;
        info!(id = created.id, name = %created.name, "instance created");
        self.invalidate_write(created.id);
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns the backend's rejection.
    pub async fn update_instance(&self, id: i64, instance: &Instance) -> Result<Instance> {
        let result = self.backend.update_instance(id, instance).await;
        // A rejected write may still have partially applied.
        self.invalidate_write(id);
        let updated = result?;
        info!(id, name = %updated.name, "instance updated");
        Ok(updated)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown ids.
    pub async fn delete_instance(&self, id: i64) -> Result<()> {
        let result = self.backend.delete_instance(id).await;
        self.invalidate_write(id);
        result?;
        info!(id, "instance deleted");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown source or a conflict for a
    /// taken name.
    pub async fn copy_instance(&self, request: &CopyRequest) -> Result<Instance> {
        let copy = self.backend.copy_instance(request).await?;
        info!(
            source = request.source_instance_id,
            id = copy.id,
            name = %copy.name,
            "instance copied"
        );
        self.invalidate_write(copy.id);
        Ok(copy)
    }

    fn invalidate_write(&self, id: i64) {
        for resource in [
            ResourceRef::Instance(id),
            ResourceRef::InstanceCollection,
            ResourceRef::HistoryCollection,
        ] {
            self.invalidate(resource);
        }
    }

    // Search and filtering

    fn search_key(
        path: &str,
        term: &str,
        query: &impl Serialize,
        options: &SearchOptions,
        collection: ResourceRef,
    ) -> Result<CacheKey> {
        Ok(CacheKey::builder("search", path)
            .param("term", term.trim())
            .params_from(query)?
            .param("options", crate::key::canonical_json(&serde_json::to_value(options)?))
            .references(collection)
            .build())
    }

    /// Rank one page of instances against `term`.
    ///
    /// # Errors
    ///
    /// Returns the error from fetching the page. Invalid patterns yield an
    /// empty result, not an error.
    pub async fn search_instances(
        &self,
        term: &str,
        query: &InstanceQuery,
        options: &SearchOptions,
    ) -> Result<Vec<RankedRecord<Instance>>> {
        let key = Self::search_key(
            "/api/instances",
            term,
            query,
            options,
            ResourceRef::InstanceCollection,
        )?;
        if let Some(SearchHits::Instances(hits)) = self.results.get_search(&key) {
            return Ok(hits);
        }
        let epoch = self.results.search_epoch();
        let page = self.list_instances(query).await?;
        let hits: Vec<RankedRecord<Instance>> = search(&page.records, term, options)
            .into_iter()
            .map(SearchResult::into_owned)
            .collect();
        self.results
            .put_search(key, SearchHits::Instances(hits.clone()), epoch);
        Ok(hits)
    }

    /// Rank one page of history against `term`.
    ///
    /// # Errors
    ///
    /// Returns the error from fetching the page.
    pub async fn search_history(
        &self,
        term: &str,
        query: &HistoryQuery,
        options: &SearchOptions,
    ) -> Result<Vec<RankedRecord<HistoryRecord>>> {
        let key = Self::search_key(
            "/api/history",
            term,
            query,
            options,
            ResourceRef::HistoryCollection,
        )?;
        if let Some(SearchHits::History(hits)) = self.results.get_search(&key) {
            return Ok(hits);
        }
        let epoch = self.results.search_epoch();
        let page = self.list_history(query).await?;
        let hits: Vec<RankedRecord<HistoryRecord>> = search(&page.records, term, options)
            .into_iter()
            .map(SearchResult::into_owned)
            .collect();
        self.results
            .put_search(key, SearchHits::History(hits.clone()), epoch);
        Ok(hits)
    }

    /// Completion candidates drawn from one page of instances.
    ///
    /// # Errors
    ///
    /// Returns the error from fetching the page.
    pub async fn suggest_instances(
        &self,
        partial: &str,
        query: &InstanceQuery,
        fields: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let page = self.list_instances(query).await?;
        Ok(suggestions(
            &page.records,
            partial,
            fields,
            self.config.search.max_suggestions,
        ))
    }

    /// # Errors
    ///
    /// Returns the error from fetching the page.
    pub async fn filter_instances(
        &self,
        query: &InstanceQuery,
        criteria: &ExtendedFilterCriteria,
    ) -> Result<Vec<Instance>> {
        let page = self.list_instances(query).await?;
        Ok(filter(&page.records, criteria).into_iter().cloned().collect())
    }

    /// # Errors
    ///
    /// Returns the error from fetching the page.
    pub async fn filter_history(
        &self,
        query: &HistoryQuery,
        criteria: &ExtendedFilterCriteria,
    ) -> Result<Vec<HistoryRecord>> {
        let page = self.list_history(query).await?;
        Ok(filter(&page.records, criteria).into_iter().cloned().collect())
    }

    /// Search options seeded from configuration.
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions::from(&self.config.search)
    }

    // Debouncing

    /// Register a debounced function under `key`, replacing any previous one.
    pub fn debounce<A, F>(
        &self,
        key: &str,
        delay: Duration,
        max_wait: Option<Duration>,
        callback: F,
    ) -> Debouncer<A>
    where
        A: Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.debouncers
            .register(Debouncer::new(key, delay, max_wait, callback))
    }

    /// [`DataAccess::debounce`] with the configured delay and max wait.
    pub fn debounce_default<A, F>(&self, key: &str, callback: F) -> Debouncer<A>
    where
        A: Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.debounce(
            key,
            Duration::from_millis(self.config.debounce.delay_ms),
            self.config.debounce.max_wait_ms.map(Duration::from_millis),
            callback,
        )
    }

    pub const fn debouncers(&self) -> &DebounceRegistry {
        &self.debouncers
    }

    // Maintenance

    /// Purge everything depending on `resource` from both caches and empty
    /// the search tier.
    pub fn invalidate(&self, resource: ResourceRef) -> Invalidation {
        let requests = self.requests.invalidate(resource);
        let mut report = self.results.invalidate(resource);
        report.primary += requests;
        report
    }

    /// Reset every cache, drop queued batches and cancel pending debounced calls.
    pub fn clear_all(&self) {
        self.requests.clear();
        self.results.clear();
        let dropped = self.batches.clear();
        self.debouncers.clear();
        info!(dropped_batch_items = dropped, "cleared all caches");
    }

    pub fn stats(&self) -> DataAccessStats {
        DataAccessStats {
            request_cache: self.requests.stats(),
            result_cache: self.results.stats(),
            batches: self.batches.stats(),
            debounced: self.debouncers.live(),
            debounce_pending: self.debouncers.pending(),
        }
    }
}
