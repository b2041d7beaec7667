//! Configuration for the data-access layer.
//!
//! Configuration is stored in TOML and grouped by component. Every field has a
//! default, so an empty file (or no file at all) yields a working setup.
//!
//! ## Sources, lowest precedence first
//!
//! 1. Built-in defaults
//! 2. `global.toml` in the platform config directory, or an explicit file via
//!    [`Config::load_from`]
//! 3. `FLEETDESK_*` environment variables (see [`Config::apply_env`])
//!
//! ```rust
//! use fleetdesk_core::Config;
//!
//! let config: Config = toml::from_str(r#"
//!     [batch]
//!     max_batch_size = 25
//! "#)?;
//! assert_eq!(config.batch.max_batch_size, 25);
//! assert_eq!(config.batch.batch_delay_ms, 50);
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FLEETDESK_";

/// Top-level configuration.
///
/// ## Example Configuration File
///
/// ```toml
/// [backend]
/// base_url = "http://inference-admin.internal:8000"
/// timeout_secs = 10
///
/// [request_cache]
/// list_ttl_ms = 5000
///
/// [result_cache]
/// max_entries = 200
///
/// [search.weights]
/// name = 4.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where and how to reach the instance backend
    pub backend: BackendConfig,
    /// In-flight deduplication windows
    pub request_cache: RequestCacheConfig,
    /// Item lookup batching
    pub batch: BatchConfig,
    /// Defaults for debounced interactive calls
    pub debounce: DebounceConfig,
    /// Longer-lived per-query cache
    pub result_cache: ResultCacheConfig,
    /// Search scoring defaults
    pub search: SearchConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the instance API, without the `/api` suffix.
    pub base_url: String,
    /// HTTP basic auth user, if the backend requires one.
    pub username: Option<String>,
    /// HTTP basic auth password.
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// Request timeout as a [`Duration`].
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Request cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestCacheConfig {
    /// Disabled means every call goes straight to the backend.
    pub enabled: bool,
    /// Window for volatile list data.
    pub list_ttl_ms: u64,
    /// Window for fetch-by-id data.
    pub item_ttl_ms: u64,
    /// Remember failures for one window to damp retry storms.
    pub cache_failures: bool,
}

impl Default for RequestCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            list_ttl_ms: 5_000,
            item_ttl_ms: 30_000,
            cache_failures: true,
        }
    }
}

/// Batch scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Disabled means each lookup runs immediately on its own.
    pub enabled: bool,
    /// Queue length that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Longest an item waits before its batch is flushed.
    pub batch_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 10,
            batch_delay_ms: 50,
        }
    }
}

/// Debounce defaults for interactive callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub delay_ms: u64,
    /// Upper bound on how long a continuously re-triggered call may be deferred.
    pub max_wait_ms: Option<u64>,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay_ms: 300,
            max_wait_ms: Some(1_000),
        }
    }
}

/// Tiered result cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCacheConfig {
    pub enabled: bool,
    /// Entry count above which the oldest fifth is evicted.
    pub max_entries: usize,
    /// Bound for the search-result tier.
    pub search_max_entries: usize,
    pub count_ttl_ms: u64,
    pub latest_ttl_ms: u64,
    pub list_ttl_ms: u64,
    /// Point lookups of immutable records (history entries).
    pub point_ttl_ms: u64,
    pub search_ttl_ms: u64,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
            search_max_entries: 50,
            count_ttl_ms: 10_000,
            latest_ttl_ms: 10_000,
            list_ttl_ms: 60_000,
            point_ttl_ms: 300_000,
            search_ttl_ms: 10_000,
        }
    }
}

/// Search scoring defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub case_sensitive: bool,
    pub min_score: f64,
    /// Added per match spanning the whole field value.
    pub exact_bonus: f64,
    /// Added per matched field beyond the first.
    pub field_bonus: f64,
    /// Characters of surrounding text kept in match snippets.
    pub context_chars: usize,
    pub max_suggestions: usize,
    /// Per-field weights; fields not listed weigh 1.0.
    pub weights: BTreeMap<String, f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            min_score: 0.0,
            exact_bonus: 2.0,
            field_bonus: 0.5,
            context_chars: 30,
            max_suggestions: 10,
            weights: default_weights(),
        }
    }
}

/// Built-in field weights.
pub fn default_weights() -> BTreeMap<String, f64> {
    [
        ("name", 3.0),
        ("model_name", 2.5),
        ("cluster_name", 2.0),
        ("description", 1.5),
        ("image_tag", 1.0),
        ("checkpoint_path", 0.5),
    ]
    .into_iter()
    .map(|(field, weight)| (field.to_string(), weight))
    .collect()
}

impl Config {
    /// Load from the platform config directory, then apply environment
    /// overrides. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined, the file
    /// cannot be read or parsed, or the result fails [`Config::validate`].
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::read(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed or invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Save to the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save to an explicit path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
        fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;
        Ok(())
    }

    /// Path of `global.toml` in the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform has no config directory.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "fleetdesk", "fleetdesk")
            .ok_or_else(|| Error::Config("Failed to determine project directories".into()))?;
        Ok(dirs.config_dir().join("global.toml"))
    }

    /// Apply `FLEETDESK_*` overrides read through `lookup`.
    ///
    /// Recognised: `BASE_URL`, `USERNAME`, `PASSWORD`, `TIMEOUT_SECS`,
    /// `DISABLE_CACHE` and `DISABLE_BATCHING`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for values that do not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|value| !value.trim().is_empty())
        };

        if let Some(url) = var("BASE_URL") {
            self.backend.base_url = url;
        }
        if let Some(user) = var("USERNAME") {
            self.backend.username = Some(user);
        }
        if let Some(password) = var("PASSWORD") {
            self.backend.password = Some(password);
        }
        if let Some(raw) = var("TIMEOUT_SECS") {
            self.backend.timeout_secs = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_PREFIX}TIMEOUT_SECS is not a number: {raw}"))
            })?;
        }
        if var("DISABLE_CACHE").is_some_and(|v| is_truthy(&v)) {
            tracing::debug!("caching disabled from environment");
            self.request_cache.enabled = false;
            self.result_cache.enabled = false;
        }
        if var("DISABLE_BATCHING").is_some_and(|v| is_truthy(&v)) {
            tracing::debug!("batching disabled from environment");
            self.batch.enabled = false;
        }
        Ok(())
    }

    /// Reject settings the components cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.backend.base_url).map_err(|e| {
            Error::Config(format!("backend.base_url '{}': {e}", self.backend.base_url))
        })?;
        if self.backend.timeout_secs == 0 {
            return Err(Error::Config("backend.timeout_secs must be positive".into()));
        }
        if self.batch.max_batch_size == 0 {
            return Err(Error::Config("batch.max_batch_size must be positive".into()));
        }
        if self.result_cache.max_entries == 0 || self.result_cache.search_max_entries == 0 {
            return Err(Error::Config("result_cache sizes must be positive".into()));
        }
        if let Some(max_wait) = self.debounce.max_wait_ms {
            if max_wait < self.debounce.delay_ms {
                return Err(Error::Config(format!(
                    "debounce.max_wait_ms ({max_wait}) is shorter than debounce.delay_ms ({})",
                    self.debounce.delay_ms
                )));
            }
        }
        if let Some((field, weight)) = self
            .search
            .weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(Error::Config(format!(
                "search.weights.{field} must be a non-negative number, got {weight}"
            )));
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.request_cache.list_ttl_ms, 5_000);
        assert_eq!(config.request_cache.item_ttl_ms, 30_000);
        assert_eq!(config.batch.batch_delay_ms, 50);
        assert_eq!(config.search.exact_bonus, 2.0);
        assert_eq!(config.search.weights.get("name"), Some(&3.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() -> Result<()> {
        // Given: A modified config saved to a temp dir
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("global.toml");
        let mut config = Config::default();
        config.backend.base_url = "http://admin.internal:9000".into();
        config.result_cache.max_entries = 42;

        // When: Saving and loading it back
        config.save_to(&path)?;
        let loaded = Config::read(&path)?;

        // Then: Values survive
        assert_eq!(loaded, config);
        Ok(())
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = Config::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("global.toml");
        fs::write(&path, "[batch\nmax_batch_size = ").unwrap();

        let err = Config::read(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        // Given: A lookup table standing in for the process environment
        let env: HashMap<&str, &str> = [
            ("FLEETDESK_BASE_URL", "http://10.0.0.5:8000"),
            ("FLEETDESK_USERNAME", "admin"),
            ("FLEETDESK_TIMEOUT_SECS", "12"),
            ("FLEETDESK_DISABLE_CACHE", "true"),
            ("FLEETDESK_DISABLE_BATCHING", "0"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();

        // When: Applying overrides
        config
            .apply_env(|name| env.get(name).map(|v| (*v).to_string()))
            .unwrap();

        // Then: Each recognised variable took effect
        assert_eq!(config.backend.base_url, "http://10.0.0.5:8000");
        assert_eq!(config.backend.username.as_deref(), Some("admin"));
        assert_eq!(config.backend.timeout_secs, 12);
        assert!(!config.request_cache.enabled);
        assert!(!config.result_cache.enabled);
        assert!(config.batch.enabled);
    }

    #[test]
    fn test_env_bad_timeout_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|name| (name == "FLEETDESK_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TIMEOUT_SECS"));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.batch.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.debounce.delay_ms = 500;
        config.debounce.max_wait_ms = Some(100);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.base_url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.weights.insert("name".into(), -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[search]\nmin_score = 1.5\n").unwrap();
        assert_eq!(config.search.min_score, 1.5);
        assert_eq!(config.search.weights, default_weights());
        assert_eq!(config.batch, BatchConfig::default());
    }
}
