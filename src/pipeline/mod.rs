// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline definitions and types
//!
//! Core data structures for shipflow pipelines: stages, actions, artifact
//! references, the dependency graph, and definition validation.

mod artifact;
mod definition;
mod graph;
mod validation;

pub use artifact::ArtifactReference;
pub use definition::*;
pub use graph::PipelineGraph;
pub use validation::{PipelineValidator, ValidationResult};
