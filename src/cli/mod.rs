//! Command-line interface for monarch-runner.
//!
//! Provides commands for sandbox reaping, raw execution, gate runs,
//! diagnostic parsing, and task attempt tracking.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
