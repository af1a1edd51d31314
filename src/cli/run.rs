// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Run command - execute the pipeline for a revision

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::collaborators::Collaborators;
use crate::orchestrator::Orchestrator;
use crate::pipeline::{Pipeline, PipelineGraph, PipelineValidator};
use crate::run::{RunStatus, RunStore, StageOutcome, Trigger};

/// Run the pipeline
pub async fn run(
    pipeline_path: PathBuf,
    revision: Option<String>,
    branch: Option<String>,
    dry_run: bool,
    verbose: bool,
) -> Result<()> {
    if !pipeline_path.exists() {
        return Err(miette::miette!(
            "Pipeline file not found: {}\n\n\
             Run 'shipflow init' to create a new project.",
            pipeline_path.display()
        ));
    }

    let pipeline = Pipeline::from_file(&pipeline_path)
        .map_err(|e| miette::miette!("Failed to load pipeline: {}", e))?;

    // Validate before anything touches the outside world
    let validation = PipelineValidator::validate(&pipeline);

    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let graph = PipelineGraph::build(&pipeline).map_err(|e| miette::miette!("{}", e))?;

    print_execution_plan(&pipeline, &graph);

    if dry_run {
        return Ok(());
    }

    let working_dir = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    let collaborators = Collaborators::command_line(&working_dir)
        .map_err(|e| miette::miette!("{}", e))?;

    // Check required tools before creating any run record
    if !collaborators
        .provisioner
        .check_available()
        .await
        .unwrap_or(false)
    {
        return Err(miette::miette!("Provisioning tool is not available"));
    }
    if !collaborators
        .publisher
        .check_available()
        .await
        .unwrap_or(false)
    {
        return Err(miette::miette!("Image build tool is not available"));
    }

    let revision = match revision {
        Some(rev) => rev,
        None => head_revision().await?,
    };

    let mut trigger = Trigger::revision(&revision);
    if let Some(branch) = branch {
        trigger = trigger.with_branch(&branch);
    }

    let store = Arc::new(
        RunStore::default_store(&working_dir).map_err(|e| miette::miette!("{}", e))?,
    );
    let orchestrator = Orchestrator::new(collaborators, store);

    let record = orchestrator
        .execute(&pipeline, &working_dir, trigger)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    // Per-stage summary in execution order
    println!();
    for idx in graph.topological_order() {
        let stage = &pipeline.stages[*idx];
        let outcome = record.outcome_of(&stage.name);

        let mark = match outcome {
            StageOutcome::Succeeded => "✓".green(),
            StageOutcome::Failed => "✗".red(),
            StageOutcome::Skipped => "–".yellow(),
            _ => "?".dimmed(),
        };

        print!("  {} {} ({})", mark, stage.name.bold(), outcome);

        if let Some(artifact) = record.artifacts.get(&stage.name) {
            print!(" {}", artifact.image_ref().cyan());
        }

        println!();

        if outcome == StageOutcome::Failed && verbose {
            if let Some(detail) = record
                .transitions
                .iter()
                .rev()
                .find(|t| t.stage == stage.name && t.outcome == StageOutcome::Failed)
                .and_then(|t| t.detail.as_ref())
            {
                eprintln!("{}", detail.dimmed());
            }
        }
    }

    println!();
    match record.status {
        RunStatus::Succeeded => {
            println!("{}", format!("Run {} succeeded", record.id).green());
            Ok(())
        }
        RunStatus::Cancelled => {
            println!("{}", format!("Run {} cancelled", record.id).yellow());
            Err(miette::miette!("Pipeline run was cancelled"))
        }
        _ => {
            println!("{}", format!("Run {} failed", record.id).red());
            Err(miette::miette!(
                "Pipeline run failed; inspect it with 'shipflow history show {}'",
                record.id
            ))
        }
    }
}

/// Print the level-structured execution plan
fn print_execution_plan(pipeline: &Pipeline, graph: &PipelineGraph) {
    println!();
    println!("{}: {}", "Pipeline".bold(), pipeline.name);
    println!("{}: {}", "Environment".bold(), pipeline.environment);
    println!("{}: {}", "Bootstrap policy".bold(), pipeline.bootstrap);
    println!("{}", "═".repeat(50));

    for (i, level) in graph.levels().iter().enumerate() {
        let names: Vec<&str> = level
            .iter()
            .map(|idx| pipeline.stages[*idx].name.as_str())
            .collect();
        println!("  {}. {}", i + 1, names.join(", "));
    }

    println!();
}

/// Current git HEAD as the default trigger revision
async fn head_revision() -> Result<String> {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .await
        .map_err(|e| miette::miette!("Failed to run git: {}", e))?;

    if !output.status.success() {
        return Err(miette::miette!(
            "Not a git repository; pass --revision explicitly"
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
