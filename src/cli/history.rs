// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! History command - inspect past runs and published artifacts

use colored::Colorize;
use miette::Result;
use uuid::Uuid;

use super::HistoryAction;
use crate::run::{RunStatus, RunStore};

/// Inspect run history
pub async fn run(action: HistoryAction, _verbose: bool) -> Result<()> {
    let working_dir = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    let store = RunStore::default_store(&working_dir).map_err(|e| miette::miette!("{}", e))?;

    match action {
        HistoryAction::List { limit } => {
            let records = store.list().await.map_err(|e| miette::miette!("{}", e))?;

            if records.is_empty() {
                println!("No runs recorded yet.");
                return Ok(());
            }

            for record in records.iter().take(limit) {
                let status = match record.status {
                    RunStatus::Succeeded => record.status.to_string().green(),
                    RunStatus::Failed => record.status.to_string().red(),
                    RunStatus::Cancelled => record.status.to_string().yellow(),
                    RunStatus::Running => record.status.to_string().blue(),
                };

                println!(
                    "{}  {}  {}  {}  {}",
                    record.id,
                    record.started_at.format("%Y-%m-%d %H:%M:%S"),
                    record.trigger.revision.bold(),
                    record.environment,
                    status
                );
            }
        }

        HistoryAction::Show { id } => {
            let id = Uuid::parse_str(&id).map_err(|_| miette::miette!("Invalid run id: {}", id))?;
            let record = store.load(id).await.map_err(|e| miette::miette!("{}", e))?;

            println!("{}: {}", "Run".bold(), record.id);
            println!("{}: {}", "Pipeline".bold(), record.pipeline);
            println!("{}: {}", "Revision".bold(), record.trigger.revision);
            println!("{}: {}", "Status".bold(), record.status);
            println!();

            for transition in &record.transitions {
                print!(
                    "  {}  {}  {}",
                    transition.at.format("%H:%M:%S%.3f"),
                    transition.stage.bold(),
                    transition.outcome
                );
                if let Some(ref detail) = transition.detail {
                    print!("  {}", detail.dimmed());
                }
                println!();
            }

            if !record.artifacts.is_empty() {
                println!();
                println!("{}:", "Artifacts".bold());
                for (stage, artifact) in &record.artifacts {
                    println!("  {} → {}", stage, artifact.image_ref().cyan());
                }
            }
        }

        HistoryAction::Artifact { stage } => {
            match store
                .last_artifact(&stage)
                .await
                .map_err(|e| miette::miette!("{}", e))?
            {
                Some(artifact) => {
                    println!(
                        "{} (published {})",
                        artifact.image_ref().cyan(),
                        artifact.published_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                None => {
                    println!("No successful publish recorded for stage '{}'.", stage);
                }
            }
        }
    }

    Ok(())
}
