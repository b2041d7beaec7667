//! Command implementations, one module per subcommand.

pub mod copy;
pub mod delete;
pub mod get;
pub mod history;
pub mod list;
pub mod search;
pub mod stats;
pub mod suggest;

/// Page size used when a command needs a broad view of the fleet.
pub const WIDE_PAGE: u32 = 500;
