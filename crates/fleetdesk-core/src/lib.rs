//! # fleetdesk-core
//!
//! Data-access layer for the fleetdesk console, which manages inference
//! service instances and their change history.
//!
//! The console issues many small, overlapping requests as users scroll,
//! type and click. This crate sits between it and the backend HTTP API and
//! keeps that traffic cheap and consistent:
//!
//! - **Request deduplication**: identical concurrent or recent calls share one
//!   in-flight request ([`RequestCache`]).
//! - **Batching**: single-instance lookups made close together are flushed
//!   as bounded batches ([`BatchScheduler`]).
//! - **Debouncing**: bursts of calls collapse into one trailing invocation,
//!   with an optional upper bound on the wait ([`Debouncer`]).
//! - **Result caching**: TTL-based caches with per-class lifetimes, bounded
//!   size and resource-based invalidation ([`TieredCache`]).
//! - **Search and filtering**: weighted multi-field ranking, highlighting,
//!   suggestions and structured filters over fetched records.
//!
//! [`DataAccess`] wires these together in front of an [`InstanceBackend`].
//!
//! ## Quick Start
//!
//! ```rust
//! use fleetdesk_core::{Instance, SearchOptions, search};
//!
//! let mut web = Instance::new(1, "prod-web-1");
//! web.model_name = "llama-3-8b".into();
//! let batch = Instance::new(2, "staging-batch");
//! let records = vec![web, batch];
//!
//! let results = search(&records, "prod", &SearchOptions::default());
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].record.name, "prod-web-1");
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`]. Errors are `Clone`
//! so a single failure can be shared by every deduplicated caller:
//!
//! ```rust
//! use fleetdesk_core::{Config, Error};
//!
//! let mut config = Config::default();
//! config.batch.max_batch_size = 0;
//! match config.validate() {
//!     Err(Error::Config(msg)) => assert!(msg.contains("max_batch_size")),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

/// Cached, batched access facade
pub mod access;
/// Backend HTTP API client
pub mod backend;
/// Batch scheduling of single-record lookups
pub mod batch;
/// Time source and timers
pub mod clock;
/// Layered configuration
pub mod config;
/// Debounced functions and their registry
pub mod debounce;
/// Error types and result aliases
pub mod error;
/// Structured record filtering
pub mod filter;
/// Deterministic cache keys and resource references
pub mod key;
/// In-flight request deduplication
pub mod request_cache;
/// TTL result caches
pub mod result_cache;
/// Weighted multi-field search
pub mod search;
/// Instance and history records
pub mod types;

#[cfg(test)]
mod test_support;

pub use access::{DataAccess, DataAccessStats};
pub use backend::{HttpBackend, InstanceBackend};
pub use batch::{BatchScheduler, BatchStats};
pub use clock::{Clock, ManualClock, SharedClock, TokioClock, system_clock};
pub use config::{
    BackendConfig, BatchConfig, Config, DebounceConfig, RequestCacheConfig, ResultCacheConfig,
    SearchConfig,
};
pub use debounce::{DebounceControl, DebounceRegistry, Debouncer};
pub use error::{Error, Result};
pub use filter::{
    ExtendedFilterCriteria, Filterable, NumericRange, TextPredicate, TimeRange, TriState, filter,
};
pub use key::{CacheKey, ResourceRef};
pub use request_cache::{RequestCache, RequestCacheStats};
pub use result_cache::{DataClass, Invalidation, ResultCache, TieredCache, TieredStats, TtlPolicy};
pub use search::{
    HighlightMarkers, MatchMode, RankedRecord, SearchMatch, SearchOptions, SearchResult,
    Searchable, highlight, highlight_field, search, suggestions,
};
pub use types::*;
