//! # CLI Structure and Argument Parsing
//!
//! This module defines the command-line interface for `fleetdesk`, a console
//! for inference service instances and their change history. The CLI is built
//! using `clap` with derive macros.
//!
//! ## Usage Patterns
//!
//! ```bash
//! # Browse instances
//! fleetdesk list --cluster us-east
//! fleetdesk get 42
//! fleetdesk get --name prod-web-1
//!
//! # Search and completion
//! fleetdesk search llama --field model_name --min-score 2
//! fleetdesk search 'v1\.[0-9]+' --mode pattern
//! fleetdesk suggest pro
//!
//! # History and maintenance
//! fleetdesk history 42 --latest
//! fleetdesk copy 42 --name prod-web-2
//! fleetdesk delete 42 --yes
//! ```
//!
//! ## Output Formats
//!
//! Data commands accept `--format text|json|jsonl`. When stdout is not a
//! terminal the default is JSON.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fleetdesk_core::{MatchMode, OperationType, Status};

use crate::output::FormatArg;
use crate::utils::parsing::{parse_operation, parse_status};

/// Main CLI structure for the `fleetdesk` command
#[derive(Parser, Clone, Debug)]
#[command(name = "fleetdesk")]
#[command(version)]
#[command(about = "fleetdesk - console for inference service instances", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress informational messages (only show errors)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Show debug logs and cache statistics after the command
    #[arg(long, global = true)]
    pub debug: bool,

    /// Disable all ANSI colors in output (also respects `NO_COLOR` env)
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Configuration file to use instead of the platform default
    #[arg(long, global = true, env = "FLEETDESK_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Backend base URL, overriding configuration and environment
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// List instances
    List {
        /// Partial name match
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        cluster: Option<String>,

        /// Status (active, inactive, pending, error)
        #[arg(long, value_parser = parse_status)]
        status: Option<Status>,

        #[arg(long)]
        priority: Option<String>,

        #[arg(short = 'n', long, default_value_t = 100)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,

        #[command(flatten)]
        format: FormatArg,
    },

    /// Show one instance by id or name
    Get {
        /// Instance id
        #[arg(required_unless_present = "name")]
        id: Option<i64>,

        /// Look up by exact name instead of id
        #[arg(long, conflicts_with = "id")]
        name: Option<String>,

        #[command(flatten)]
        format: FormatArg,
    },

    /// Show change history, for one instance or across all of them
    History {
        /// Restrict to one instance
        id: Option<i64>,

        /// Only this operation type (create, update, delete, rollback)
        #[arg(long, value_parser = parse_operation)]
        operation: Option<OperationType>,

        /// Show only the most recent record (requires an id)
        #[arg(long, requires = "id", conflicts_with = "count")]
        latest: bool,

        /// Show only the number of records (requires an id)
        #[arg(long, requires = "id")]
        count: bool,

        #[arg(short = 'n', long, default_value_t = 50)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,

        #[command(flatten)]
        format: FormatArg,
    },

    /// Rank instances (or history) against a search term
    Search(SearchArgs),

    /// Complete a partially typed term from instance fields
    Suggest {
        partial: String,

        /// Only draw candidates from these fields (repeatable)
        #[arg(long = "field", value_name = "FIELD")]
        fields: Vec<String>,

        #[command(flatten)]
        format: FormatArg,
    },

    /// Delete an instance
    Delete {
        id: i64,

        /// Skip the confirmation check against the current name
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Copy an instance under a new name
    Copy {
        /// Source instance id
        id: i64,

        /// Name for the copy; the backend derives one when omitted
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        format: FormatArg,
    },

    /// Show effective configuration and cache statistics
    Stats {
        #[command(flatten)]
        format: FormatArg,
    },
}

impl Commands {
    /// Output format selector, for commands that print data.
    pub const fn format_arg(&self) -> Option<&FormatArg> {
        match self {
            Self::List { format, .. }
            | Self::Get { format, .. }
            | Self::History { format, .. }
            | Self::Suggest { format, .. }
            | Self::Copy { format, .. }
            | Self::Stats { format } => Some(format),
            Self::Search(args) => Some(&args.format),
            Self::Delete { .. } => None,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct SearchArgs {
    /// Search term
    pub term: String,

    /// How the term is interpreted (substring, exact, pattern)
    #[arg(long, default_value_t = MatchMode::Substring)]
    pub mode: MatchMode,

    /// Drop results scoring below this
    #[arg(long, value_name = "SCORE")]
    pub min_score: Option<f64>,

    /// Only search these fields (repeatable)
    #[arg(long = "field", value_name = "FIELD")]
    pub fields: Vec<String>,

    #[arg(long)]
    pub case_sensitive: bool,

    /// Search change history instead of instances
    #[arg(long)]
    pub history: bool,

    /// Maximum results to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,

    /// Do not mark matched text
    #[arg(long)]
    pub no_highlight: bool,

    #[command(flatten)]
    pub format: FormatArg,
}
