// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Validate command - check the pipeline definition

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::pipeline::{Pipeline, PipelineValidator};

/// Validate the pipeline configuration
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> Result<()> {
    if !pipeline_path.exists() {
        return Err(miette::miette!(
            "Pipeline file not found: {}",
            pipeline_path.display()
        ));
    }

    let pipeline = Pipeline::from_file(&pipeline_path)
        .map_err(|e| miette::miette!("Failed to load pipeline: {}", e))?;

    let validation = PipelineValidator::validate(&pipeline);

    if !validation.errors.is_empty() {
        println!("{}", "Errors:".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !validation.warnings.is_empty() {
        println!("{}", "Warnings:".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if validation.is_valid() {
        println!(
            "{} {} ({} stage{}, bootstrap: {})",
            "✓".green(),
            "Pipeline is valid".green().bold(),
            pipeline.stages.len(),
            if pipeline.stages.len() == 1 { "" } else { "s" },
            pipeline.bootstrap
        );

        if verbose {
            for stage in &pipeline.stages {
                println!("  - {} ({})", stage.name, stage.action_name());
            }
        }

        Ok(())
    } else {
        Err(miette::miette!("Pipeline configuration is invalid"))
    }
}
