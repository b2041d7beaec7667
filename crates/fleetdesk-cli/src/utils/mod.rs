//! Shared helpers for the CLI.

pub mod logging;
pub mod parsing;
pub mod suggest;
