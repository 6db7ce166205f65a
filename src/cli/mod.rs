//! Command-line interface for ideaforge.
//!
//! Provides commands for running analysis pipelines directly and for
//! running a queue worker that consumes submitted ideas.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
