//! CLI command definitions for the `keelson` binary.
//!
//! Uses clap derive macros for argument parsing. Every command except
//! `completions` goes through the workflow manager in [`crate::state`].

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use keelson_types::status::WorkflowStatus;

/// Run durable workflow graphs that resume from their checkpoints.
#[derive(Parser)]
#[command(name = "keelson", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except results and errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for lifecycle, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default tracing directive for the chosen verbosity. `RUST_LOG` wins.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "warn,keelson=info",
            2 => "info,keelson=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow graph from a YAML file.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Workflow id; an existing id is resumed instead.
        #[arg(long)]
        id: Option<String>,

        /// Workflow metadata as a JSON object.
        #[arg(long)]
        metadata: Option<String>,

        /// Positional workflow inputs as a JSON array.
        #[arg(long)]
        args: Option<String>,

        /// Keyword workflow inputs as a JSON object.
        #[arg(long)]
        kwargs: Option<String>,
    },

    /// Resume a RESUMABLE or FAILED workflow from its checkpoints.
    Resume {
        workflow_id: String,
    },

    /// Resume every RESUMABLE workflow.
    #[command(name = "resume-all")]
    ResumeAll {
        /// Also resume FAILED workflows.
        #[arg(long)]
        include_failed: bool,
    },

    /// List workflows, optionally filtered by status.
    #[command(alias = "ls")]
    List {
        /// Status to include (repeatable). Case-insensitive.
        #[arg(long = "status", value_parser = parse_status)]
        statuses: Vec<WorkflowStatus>,
    },

    /// Show the status of a workflow.
    Status {
        workflow_id: String,
    },

    /// Show workflow or task metadata.
    Metadata {
        workflow_id: String,

        /// Task name for task-level metadata.
        #[arg(long)]
        task: Option<String>,
    },

    /// Print the output of a workflow or one of its tasks.
    Output {
        workflow_id: String,

        /// Task name for a task's checkpointed output.
        #[arg(long)]
        task: Option<String>,
    },

    /// Cancel a RUNNING or RESUMABLE workflow.
    Cancel {
        workflow_id: String,
    },

    /// Delete a workflow and its checkpoints.
    #[command(alias = "rm")]
    Delete {
        workflow_id: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn parse_status(s: &str) -> Result<WorkflowStatus, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_list_statuses_are_normalized() {
        let cli = Cli::try_parse_from([
            "keelson", "list", "--status", "running", "--status", "CANCELLED",
        ])
        .unwrap();
        match cli.command {
            Commands::List { statuses } => assert_eq!(
                statuses,
                vec![WorkflowStatus::Running, WorkflowStatus::Canceled]
            ),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(Cli::try_parse_from(["keelson", "list", "--status", "paused"]).is_err());
    }

    #[test]
    fn test_run_arguments_and_global_flags() {
        let cli = Cli::try_parse_from([
            "keelson", "run", "flow.yaml", "--id", "wf-1", "--args", "[1, 2]", "--json", "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.log_directive(), "info,keelson=debug");
        match cli.command {
            Commands::Run { file, id, args, .. } => {
                assert_eq!(file, PathBuf::from("flow.yaml"));
                assert_eq!(id.as_deref(), Some("wf-1"));
                assert_eq!(args.as_deref(), Some("[1, 2]"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_quiet_lowers_log_level() {
        let cli = Cli::try_parse_from(["keelson", "--quiet", "status", "wf"]).unwrap();
        assert_eq!(cli.log_directive(), "error");
    }
}
