//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ecsdeploy - Declarative container cluster and application deployer.
#[derive(Parser, Debug)]
#[command(name = "ecsdeploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "ECSDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Path of the simulated cloud state file.
    #[arg(long, global = true, env = "ECSDEPLOY_SANDBOX")]
    pub sandbox: Option<PathBuf>,

    /// Skip confirmation prompts.
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what a run would change without changing anything.
    Plan {
        /// Which part to plan.
        #[command(subcommand)]
        target: PlanTarget,
    },

    /// Create or update the cluster.
    ClusterCreate,

    /// Delete the cluster and its supporting resources.
    ClusterDelete {
        /// Keep deleting after a resource fails and report failures at the end.
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Deploy the application.
    Deploy,

    /// Delete the application's resources.
    Delete {
        /// Keep deleting after a resource fails and report failures at the end.
        #[arg(long)]
        continue_on_error: bool,

        /// Leave the image repository in place.
        #[arg(long)]
        keep_repository: bool,
    },
}

/// Plan targets.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum PlanTarget {
    /// Plan the cluster.
    Cluster,
    /// Plan the application deployment.
    App,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delete_flags() {
        let cli = Cli::try_parse_from([
            "ecsdeploy",
            "--yes",
            "delete",
            "--continue-on-error",
            "--keep-repository",
        ])
        .unwrap();

        assert!(cli.yes);
        assert!(matches!(
            cli.command,
            Commands::Delete {
                continue_on_error: true,
                keep_repository: true
            }
        ));
    }

    #[test]
    fn test_parse_plan_target() {
        let cli = Cli::try_parse_from(["ecsdeploy", "plan", "app", "--output", "json"]).unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Plan {
                target: PlanTarget::App
            }
        ));
    }
}
