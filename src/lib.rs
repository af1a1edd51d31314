// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! # shipflow - Deployment Pipeline Orchestrator
//!
//! `shipflow` drives a web application deployment pipeline over managed
//! container infrastructure: test, provision, publish, and roll out, in an
//! explicit dependency graph instead of a fixed script.
//!
//! ## Features
//!
//! - **Dependency graph** - Stages declare upstream dependencies; cycles
//!   and unknown references fail at construction
//! - **Bootstrap policies** - The first-deploy circularity between
//!   "infrastructure exists" and "an image exists" is resolved explicitly,
//!   never left to fail at image pull
//! - **Audit trail** - Every run leaves an append-only record of stage
//!   transitions and published artifacts
//! - **Skip propagation** - A failed stage skips its downstream cone;
//!   independent branches still run
//!
//! ## Quick Start
//!
//! ```bash
//! # Initialize a new project
//! shipflow init my-app
//!
//! # Check the pipeline definition
//! shipflow validate
//!
//! # Deploy a revision
//! shipflow run --revision abc123
//!
//! # Inspect what is running
//! shipflow history artifact publish
//! ```

pub mod cli;
pub mod collaborators;
pub mod errors;
pub mod orchestrator;
pub mod pipeline;
pub mod run;

// Re-export commonly used types
pub use errors::{ShipflowError, ShipflowResult};
pub use orchestrator::Orchestrator;
pub use pipeline::{ArtifactReference, Pipeline, PipelineGraph, Stage};
pub use run::{RunRecord, RunStatus, RunStore, StageOutcome, Trigger};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
