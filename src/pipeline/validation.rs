// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline validation
//!
//! Validates pipeline configuration before execution.

use std::collections::HashSet;

use crate::errors::ShipflowError;
use crate::pipeline::{Action, Pipeline, PipelineGraph, Stage};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline configuration
    pub fn validate(pipeline: &Pipeline) -> ValidationResult {
        let mut result = ValidationResult::new();

        if pipeline.stages.is_empty() {
            result.add_error("Pipeline has no stages defined");
        }

        if pipeline.environment.is_empty() {
            result.add_error("Pipeline has no target environment");
        }

        // Check for duplicate stage names
        let mut seen_names = HashSet::new();
        for stage in &pipeline.stages {
            if !seen_names.insert(&stage.name) {
                result.add_error(&format!("Duplicate stage name: '{}'", stage.name));
            }
        }

        // Graph structure (cycles, unknown dependencies, bootstrap property)
        match PipelineGraph::build(pipeline) {
            Ok(graph) => {
                for stage in &pipeline.stages {
                    Self::validate_stage(stage, pipeline, &graph, &mut result);
                }
            }
            Err(ShipflowError::CycleDetected { stages }) => {
                result.add_error(&format!("Circular dependency: {}", stages.join(", ")));
            }
            Err(ShipflowError::UnknownDependency { stage, dependency }) => {
                result.add_error(&format!(
                    "Stage '{}' depends on unknown stage '{}'",
                    stage, dependency
                ));
            }
            Err(ShipflowError::InvalidStage { .. }) => {
                // Duplicate stage names are already reported above
            }
            Err(ShipflowError::AmbiguousBootstrap { stage }) => {
                result.add_error(&format!(
                    "Stage '{}' provisions a compute service with no path to a published \
                     artifact (bootstrap policy: {})",
                    stage, pipeline.bootstrap
                ));
            }
            Err(e) => {
                result.add_error(&format!("Graph validation error: {}", e));
            }
        }

        result
    }

    /// Validate a single stage against the rest of the pipeline
    fn validate_stage(
        stage: &Stage,
        pipeline: &Pipeline,
        graph: &PipelineGraph,
        result: &mut ValidationResult,
    ) {
        match &stage.action {
            Action::Test { command, .. } => {
                if command.is_empty() {
                    result.add_error(&format!("Stage '{}': test command is empty", stage.name));
                }
            }
            Action::Provision { dir, .. } => {
                if dir.as_os_str().is_empty() {
                    result.add_error(&format!(
                        "Stage '{}': provision directory is empty",
                        stage.name
                    ));
                }
            }
            Action::Publish { destination, context, .. } => {
                if context.as_os_str().is_empty() {
                    result.add_error(&format!("Stage '{}': build context is empty", stage.name));
                }

                if let Some(key) = destination.output_key() {
                    Self::check_output_source(stage, key, pipeline, graph, result);
                }
            }
            Action::UpdateService { service, artifact_from } => {
                if let Some(key) = service.output_key() {
                    Self::check_output_source(stage, key, pipeline, graph, result);
                }

                match artifact_from {
                    Some(from) => {
                        match pipeline.get_stage(from) {
                            Some(src) if !src.publishes_artifact() => {
                                result.add_error(&format!(
                                    "Stage '{}': artifact_from '{}' is not a publish stage",
                                    stage.name, from
                                ));
                            }
                            Some(_) => {
                                if !graph.depends_transitively(&stage.name, from) {
                                    result.add_warning(&format!(
                                        "Stage '{}': takes an artifact from '{}' but does not \
                                         depend on it",
                                        stage.name, from
                                    ));
                                }
                            }
                            None => {
                                result.add_error(&format!(
                                    "Stage '{}': artifact_from references unknown stage '{}'",
                                    stage.name, from
                                ));
                            }
                        }
                    }
                    None => {
                        let has_upstream_publisher = pipeline
                            .stages
                            .iter()
                            .filter(|s| s.publishes_artifact())
                            .any(|s| graph.depends_transitively(&stage.name, &s.name));

                        if !has_upstream_publisher {
                            result.add_warning(&format!(
                                "Stage '{}': no upstream publish stage provides an artifact",
                                stage.name
                            ));
                        }
                    }
                }
            }
        }
    }

    /// A from_output value should be produced by some upstream provision stage
    fn check_output_source(
        stage: &Stage,
        _key: &str,
        pipeline: &Pipeline,
        graph: &PipelineGraph,
        result: &mut ValidationResult,
    ) {
        let has_upstream_provision = pipeline
            .stages
            .iter()
            .filter(|s| matches!(s.action, Action::Provision { .. }))
            .any(|s| graph.depends_transitively(&stage.name, &s.name));

        if !has_upstream_provision {
            result.add_warning(&format!(
                "Stage '{}': reads a provisioner output but no upstream provision stage exists",
                stage.name
            ));
        }
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BootstrapPolicy, ValueSource};
    use std::collections::HashMap;

    fn pipeline_from_yaml(yaml: &str) -> Pipeline {
        Pipeline::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_validate_empty_pipeline() {
        let pipeline = Pipeline {
            version: "1".into(),
            name: "empty".into(),
            description: None,
            environment: "dev".into(),
            bootstrap: BootstrapPolicy::default(),
            stages: vec![],
        };

        let result = PipelineValidator::validate(&pipeline);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no stages"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let yaml = r#"
version: "1"
name: "dups"
environment: "dev"
stages:
  - name: "dup"
    action:
      type: test
      command: "true"
  - name: "dup"
    action:
      type: test
      command: "false"
"#;

        let result = PipelineValidator::validate(&pipeline_from_yaml(yaml));
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("Duplicate")));
    }

    #[test]
    fn test_validate_ambiguous_bootstrap_surfaces_policy() {
        let yaml = r#"
version: "1"
name: "broken"
environment: "prod"
bootstrap:
  policy: reorder
stages:
  - name: "provision"
    action:
      type: provision
      dir: infra/
  - name: "publish"
    action:
      type: publish
      context: app/
      destination:
        from_output: registry_uri
    depends_on:
      - provision
"#;

        let result = PipelineValidator::validate(&pipeline_from_yaml(yaml));
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("reorder")));
    }

    #[test]
    fn test_update_without_upstream_publish_warns() {
        let pipeline = Pipeline {
            version: "1".into(),
            name: "warny".into(),
            description: None,
            environment: "dev".into(),
            bootstrap: BootstrapPolicy::default(),
            stages: vec![crate::pipeline::Stage {
                name: "deploy".into(),
                description: None,
                action: Action::UpdateService {
                    service: ValueSource::Literal("svc-1".into()),
                    artifact_from: None,
                },
                depends_on: vec![],
                env: HashMap::new(),
            }],
        };

        let result = PipelineValidator::validate(&pipeline);
        assert!(result.is_valid());
        assert!(result.has_warnings());
    }
}
