//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Skyform - declarative infrastructure stacks.
#[derive(Parser, Debug)]
#[command(name = "skyform")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the declaration file.
    #[arg(short, long, global = true, env = "SKYFORM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new Skyform stack.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the declarations and their dependency graph.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Print resources in dependency order.
    Graph,

    /// Compute and display the plan.
    Plan {
        /// Show changed inputs for each action.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Compute and execute the plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Maximum concurrent actions, 1 to 64 (overrides the declaration file).
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..=64))]
        parallelism: Option<u16>,
    },

    /// Delete every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },

    /// Forget a resource without deleting it.
    Rm {
        /// Resource id to drop from state.
        id: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from(["skyform", "apply", "--yes", "-p", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Apply {
                yes: true,
                parallelism: Some(2)
            }
        ));
    }

    #[test]
    fn test_parallelism_out_of_range_is_rejected() {
        for bad in ["0", "65", "-1"] {
            assert!(Cli::try_parse_from(["skyform", "apply", "-p", bad]).is_err(), "{bad}");
        }
        assert!(Cli::try_parse_from(["skyform", "apply", "-p", "64"]).is_ok());
    }

    #[test]
    fn test_state_rm() {
        let cli = Cli::try_parse_from(["skyform", "--output", "json", "state", "rm", "pool"]).unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        match cli.command {
            Commands::State {
                command: StateCommands::Rm { id },
            } => assert_eq!(id, "pool"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
