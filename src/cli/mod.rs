//! Command-line interface for stratforge.
//!
//! Provides commands for artifact generation, standalone verification,
//! and credential management.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
