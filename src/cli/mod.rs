//! Command-line interface for scmsync.
//!
//! Provides the reaper process entry point and queue inspection commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, ReapArgs, StatsArgs};
