// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Graph command - render the stage dependency graph

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::GraphFormat;
use crate::pipeline::{Pipeline, PipelineGraph};

/// Show the pipeline as a graph
pub async fn run(pipeline_path: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let pipeline = Pipeline::from_file(&pipeline_path)
        .map_err(|e| miette::miette!("Failed to load pipeline: {}", e))?;

    let graph = PipelineGraph::build(&pipeline).map_err(|e| miette::miette!("{}", e))?;

    match format {
        GraphFormat::Text => {
            println!("{}: {}", "Pipeline".bold(), pipeline.name);
            println!("{}: {}", "Bootstrap policy".bold(), pipeline.bootstrap);
            println!();
            print!("{}", graph.to_text(&pipeline));
        }
        GraphFormat::Dot => print!("{}", graph.to_dot()),
        GraphFormat::Mermaid => print!("{}", graph.to_mermaid()),
    }

    Ok(())
}
