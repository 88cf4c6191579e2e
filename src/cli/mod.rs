//! CLI module for the ecsdeploy tool.
//!
//! This module provides the command-line interface for creating clusters
//! and deploying applications onto them.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, PlanTarget};
pub use output::{ConsoleSink, OutputFormatter};
