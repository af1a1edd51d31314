// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! shipflow - Deployment Pipeline Orchestrator
//!
//! Test, provision, publish, and roll out in an explicit dependency graph.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Init { name } => shipflow::cli::init::run(name, cli.verbose).await,
        Commands::Run {
            pipeline,
            revision,
            branch,
            dry_run,
        } => shipflow::cli::run::run(pipeline, revision, branch, dry_run, cli.verbose).await,
        Commands::Validate { pipeline } => {
            shipflow::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Graph { pipeline, format } => {
            shipflow::cli::graph::run(pipeline, format, cli.verbose).await
        }
        Commands::History { action } => shipflow::cli::history::run(action, cli.verbose).await,
    }
}
