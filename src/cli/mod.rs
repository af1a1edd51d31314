// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for shipflow.

pub mod graph;
pub mod history;
pub mod init;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Deployment pipeline orchestrator
///
/// Provision infrastructure, publish images, and roll out services in
/// dependency order.
#[derive(Parser, Debug)]
#[clap(
    name = "shipflow",
    version,
    about = "Deployment pipeline orchestrator for container infrastructure workflows",
    long_about = None,
    after_help = "Examples:\n\
        shipflow init                   Initialize a new project\n\
        shipflow validate               Check the pipeline definition\n\
        shipflow run --revision abc123  Execute the pipeline for a revision\n\
        shipflow history artifact publish   Show the last published artifact\n\n\
        See 'shipflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new shipflow project
    Init {
        /// Project name (defaults to current directory name)
        name: Option<String>,
    },

    /// Run the pipeline for a revision
    Run {
        /// Pipeline file
        #[clap(short, long, default_value = "shipflow.yaml")]
        pipeline: PathBuf,

        /// Revision identifier to build and deploy
        /// (defaults to the current git HEAD)
        #[clap(short, long)]
        revision: Option<String>,

        /// Branch the revision was pushed to
        #[clap(short, long)]
        branch: Option<String>,

        /// Dry run (show the execution plan without running anything)
        #[clap(long)]
        dry_run: bool,
    },

    /// Validate pipeline configuration
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = "shipflow.yaml")]
        pipeline: PathBuf,
    },

    /// Show the pipeline as a graph
    Graph {
        /// Pipeline file
        #[clap(default_value = "shipflow.yaml")]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, default_value = "text", value_enum)]
        format: GraphFormat,
    },

    /// Inspect past runs and published artifacts
    History {
        #[clap(subcommand)]
        action: HistoryAction,
    },
}

/// History inspection actions
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryAction {
    /// List recent runs
    List {
        /// Maximum number of runs to show
        #[clap(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one run's full transition log
    Show {
        /// Run identifier
        id: String,
    },

    /// Show the last-known artifact reference for a stage
    Artifact {
        /// Stage name
        stage: String,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_format_parses_from_args() {
        let cli = Cli::try_parse_from(["shipflow", "graph", "--format", "dot"]).unwrap();
        match cli.command {
            Commands::Graph { format, .. } => assert_eq!(format, GraphFormat::Dot),
            other => panic!("Expected Graph command, got {:?}", other),
        }
    }

    #[test]
    fn test_graph_format_defaults_to_text() {
        let cli = Cli::try_parse_from(["shipflow", "graph"]).unwrap();
        match cli.command {
            Commands::Graph { format, .. } => assert_eq!(format, GraphFormat::Text),
            other => panic!("Expected Graph command, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_graph_format_is_a_parse_error() {
        assert!(Cli::try_parse_from(["shipflow", "graph", "--format", "ascii"]).is_err());
    }
}
