// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Error types for pipeline construction and stage execution
//!
//! Construction errors (`CycleDetected`, `UnknownDependency`,
//! `AmbiguousBootstrap`) abort a run before any stage executes. Stage
//! execution errors are local: they skip-propagate to downstream stages
//! but never abort independent branches of the graph.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for shipflow operations
pub type ShipflowResult<T> = Result<T, ShipflowError>;

/// Main error type for shipflow
#[derive(Error, Debug, Diagnostic)]
pub enum ShipflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Graph Construction Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Cycle detected in stage dependencies")]
    #[diagnostic(
        code(shipflow::cycle_detected),
        help("Review the depends_on lists of the named stages to remove the cycle")
    )]
    CycleDetected { stages: Vec<String> },

    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    #[diagnostic(
        code(shipflow::unknown_dependency),
        help("Check that '{dependency}' is defined in your pipeline")
    )]
    UnknownDependency { stage: String, dependency: String },

    #[error("Stage '{stage}' provisions a compute service with no path to a published artifact")]
    #[diagnostic(
        code(shipflow::ambiguous_bootstrap),
        help(
            "The service would start against an image tag that does not exist yet. \
             Either make the service stage depend (transitively) on a publish stage \
             (reorder policy), or add an update_service stage downstream of a publish \
             stage (placeholder policy)."
        )
    )]
    AmbiguousBootstrap { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(shipflow::pipeline_not_found),
        help("Create a pipeline with 'shipflow init' or create shipflow.yaml manually")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(shipflow::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Stage '{stage}' is invalid: {reason}")]
    #[diagnostic(code(shipflow::invalid_stage))]
    InvalidStage { stage: String, reason: String },

    #[error("Stage '{stage}' not found in pipeline")]
    #[diagnostic(code(shipflow::stage_not_found))]
    StageNotFound { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Stage Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Tests failed in stage '{stage}'")]
    #[diagnostic(code(shipflow::test_failure))]
    TestFailure { stage: String, log: String },

    #[error("Provisioning failed: {detail}")]
    #[diagnostic(code(shipflow::provision_error))]
    ProvisionError {
        detail: String,
        #[help]
        help: Option<String>,
    },

    #[error("Image build failed: {detail}")]
    #[diagnostic(code(shipflow::build_error))]
    BuildError { detail: String },

    #[error("Image publish failed: {detail}")]
    #[diagnostic(code(shipflow::publish_error))]
    PublishError { detail: String },

    #[error("Service update failed for '{service}': {detail}")]
    #[diagnostic(code(shipflow::update_error))]
    UpdateError { service: String, detail: String },

    #[error("Stage '{stage}' needs output '{key}' which no upstream stage produced")]
    #[diagnostic(
        code(shipflow::missing_output),
        help("Check that an upstream provision stage exports '{key}' and that it succeeded")
    )]
    MissingOutput { stage: String, key: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Tool Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(shipflow::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Run Record Store Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Run store error: {message}")]
    #[diagnostic(code(shipflow::store_error))]
    StoreError { message: String },

    #[error("Run '{id}' not found")]
    #[diagnostic(code(shipflow::run_not_found))]
    RunNotFound { id: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(shipflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(shipflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(shipflow::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for ShipflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ShipflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ShipflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl ShipflowError {
    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "terraform" => "Install Terraform: https://developer.hashicorp.com/terraform/install".to_string(),
            "docker" => "Install Docker: https://docs.docker.com/engine/install/".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Create a provision error with helpful context parsed from tool output
    pub fn provision_failed(stderr: String) -> Self {
        let help = Self::parse_terraform_error(&stderr);
        Self::ProvisionError { detail: stderr, help }
    }

    fn parse_terraform_error(stderr: &str) -> Option<String> {
        if stderr.contains("Error acquiring the state lock") {
            Some("Another apply holds the state lock. Wait for it or break the lock deliberately.".into())
        } else if stderr.contains("no valid credential sources") || stderr.contains("NoCredentialProviders") {
            Some("Cloud credentials are missing. Pass them through the stage's env map.".into())
        } else if stderr.contains("Backend initialization required") {
            Some("The working directory has not been initialized. shipflow runs init automatically; check backend configuration.".into())
        } else {
            None
        }
    }

    /// Short error detail suitable for a run record entry
    pub fn detail(&self) -> String {
        self.to_string()
    }
}
