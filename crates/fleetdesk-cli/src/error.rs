//! CLI error handling with semantic exit codes.
//!
//! | Code | Category | Description |
//! |------|----------|-------------|
//! | 0 | Success | Command completed successfully |
//! | 1 | `Internal` | Unexpected/internal error |
//! | 2 | `Usage` | Invalid arguments or configuration |
//! | 3 | `NotFound` | Requested instance or record not found |
//! | 4 | `InvalidQuery` | Search term or filter could not be used |
//! | 5 | `Network` | Backend unreachable or failing |
//! | 6 | `Timeout` | Backend did not answer in time |
//! | 7 | `Rejected` | Backend refused the request (validation, auth, conflict) |
//!
//! ```bash
//! fleetdesk get --name prod-web-9
//! case $? in
//!     0) echo "found" ;;
//!     3) echo "no such instance" ;;
//!     *) echo "other error" ;;
//! esac
//! ```

use std::fmt;
use std::process::ExitCode;

/// Semantic error category determining the exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCategory {
    /// Unexpected or internal error (exit code 1).
    Internal = 1,

    /// Invalid arguments or configuration (exit code 2).
    Usage = 2,

    /// Requested resource not found (exit code 3).
    NotFound = 3,

    /// Search term or filter could not be used (exit code 4).
    InvalidQuery = 4,

    /// Transport failure or backend server error (exit code 5).
    Network = 5,

    /// Operation timed out (exit code 6).
    Timeout = 6,

    /// The backend answered but refused the request (exit code 7).
    Rejected = 7,
}

impl ErrorCategory {
    /// Get the exit code for this category.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn as_exit_code(self) -> ExitCode {
        ExitCode::from(self.exit_code())
    }

    /// Get a short description of this error category.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Internal => "internal error",
            Self::Usage => "usage error",
            Self::NotFound => "not found",
            Self::InvalidQuery => "invalid query",
            Self::Network => "network error",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
        }
    }

    /// Category for a data-access error, from its own classification.
    #[must_use]
    pub fn from_core(err: &fleetdesk_core::Error) -> Self {
        match err.category() {
            "timeout" => Self::Timeout,
            "network" | "server" => Self::Network,
            "not_found" => Self::NotFound,
            "validation" | "auth" | "conflict" | "upstream" => Self::Rejected,
            "pattern" => Self::InvalidQuery,
            "config" => Self::Usage,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A CLI error with a semantic category for exit code mapping.
#[derive(Debug)]
pub struct CliError {
    pub category: ErrorCategory,
    pub source: anyhow::Error,
}

impl CliError {
    pub fn new(category: ErrorCategory, source: impl Into<anyhow::Error>) -> Self {
        Self {
            category,
            source: source.into(),
        }
    }

    pub fn usage(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorCategory::Usage, source)
    }

    pub fn not_found(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorCategory::NotFound, source)
    }

    /// Get the exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.category.exit_code()
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<fleetdesk_core::Error> for CliError {
    fn from(err: fleetdesk_core::Error) -> Self {
        Self::new(ErrorCategory::from_core(&err), err)
    }
}

/// Determine the exit code from an `anyhow::Error`.
///
/// A [`CliError`] keeps its category; a core error anywhere in the chain is
/// classified by its own category; anything else is internal.
#[must_use]
pub fn exit_code_from_error(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    err.chain()
        .find_map(|cause| cause.downcast_ref::<fleetdesk_core::Error>())
        .map_or(ErrorCategory::Internal, ErrorCategory::from_core)
        .exit_code()
}
