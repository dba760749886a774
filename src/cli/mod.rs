//! Command-line interface for distro-bench.
//!
//! Provides commands for browsing and exporting the task registry, evaluating
//! an attempted build, printing environment setup, and collecting agent traces.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
