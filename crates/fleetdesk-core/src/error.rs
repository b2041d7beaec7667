//! Error types and handling for fleetdesk-core operations.
//!
//! Every fallible operation in the data-access layer returns [`Result<T, Error>`].
//! Errors are grouped by where they originate so callers can decide whether to
//! offer a retry or explain the failure:
//!
//! - **Transport failures**: no response reached us (`Network`, `Timeout`).
//!   These are retryable and are never remembered beyond one cache window.
//! - **Upstream rejections**: the backend answered with an error status
//!   (`Upstream`, `NotFound`). Classified into validation, auth, not-found,
//!   conflict and server categories.
//! - **Local failures**: bad configuration or an invalid search pattern
//!   (`Config`, `InvalidPattern`, `Serialization`).
//! - **Cancellation**: pending batched or debounced work was dropped by a
//!   `clear()` before it ran (`Cancelled`).
//!
//! `Error` is `Clone` so that a single failed request can be handed to every
//! caller waiting on the same shared in-flight future.
//!
//! ```rust
//! use fleetdesk_core::Error;
//!
//! let err = Error::Upstream { status: 503, message: "database unavailable".into() };
//! assert_eq!(err.category(), "server");
//! assert!(err.is_recoverable());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// The main error type for fleetdesk-core operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The request never produced a response.
    ///
    /// Wraps the underlying `reqwest::Error` behind an `Arc` so the error can
    /// be shared between deduplicated callers.
    ///
    /// ## Recoverability
    ///
    /// Connection and timeout failures are recoverable; builder and decode
    /// failures are not.
    #[error("Network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// The operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The backend rejected the request with an error status.
    ///
    /// Use [`Error::category`] to get the validation / auth / conflict /
    /// server classification derived from `status`.
    #[error("Backend rejected request ({status}): {message}")]
    Upstream {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Human-readable message extracted from the response body.
        message: String,
    },

    /// Requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration is invalid or inaccessible.
    ///
    /// ## Common Causes
    ///
    /// - Invalid TOML syntax in the config file
    /// - Zero-sized caches or batches
    /// - A debounce max wait shorter than the debounce delay
    /// - An unparsable backend base URL
    #[error("Configuration error: {0}")]
    Config(String),

    /// A pattern-mode search term could not be compiled.
    ///
    /// The search engine never surfaces this to callers of `search`; it turns
    /// the failure into "no matches". It is returned by `Matcher::new`.
    #[error("Invalid search pattern: {0}")]
    InvalidPattern(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pending work was dropped before it ran.
    ///
    /// Returned to callers whose batched item was discarded by
    /// `BatchScheduler::clear`.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(Arc::new(err))
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Build an upstream rejection from a status code, mapping 404 to
    /// [`Error::NotFound`].
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 404 {
            Self::NotFound(message)
        } else {
            Self::Upstream { status, message }
        }
    }

    /// Check if the error might be recoverable through retry logic.
    ///
    /// Transport failures, 5xx responses and 429 throttling are recoverable.
    /// Validation, auth, not-found, conflict and local failures are not.
    ///
    /// ```rust
    /// use fleetdesk_core::Error;
    ///
    /// assert!(Error::Timeout("slow".into()).is_recoverable());
    /// assert!(!Error::Upstream { status: 422, message: "bad".into() }.is_recoverable());
    /// assert!(!Error::InvalidPattern("(".into()).is_recoverable());
    /// ```
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout(_) => true,
            Self::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns `true` when no response reached the caller.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// HTTP status carried by the error, when it came from the backend.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Get the error category as a string identifier.
    ///
    /// - `"network"` / `"timeout"`: transport failures
    /// - `"validation"`, `"auth"`, `"not_found"`, `"conflict"`, `"server"`,
    ///   `"upstream"`: backend rejections
    /// - `"config"`, `"pattern"`, `"serialization"`: local failures
    /// - `"cancelled"`, `"other"`
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Upstream { status, .. } => match *status {
                400 | 422 => "validation",
                401 | 403 => "auth",
                404 => "not_found",
                409 => "conflict",
                500..=599 => "server",
                _ => "upstream",
            },
            Self::NotFound(_) => "not_found",
            Self::Config(_) => "config",
            Self::InvalidPattern(_) => "pattern",
            Self::Serialization(_) => "serialization",
            Self::Cancelled(_) => "cancelled",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
