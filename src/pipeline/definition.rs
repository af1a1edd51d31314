// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for shipflow.yaml files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Pipeline definition from shipflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Target environment identifier
    ///
    /// Provisioning stages for the same environment are serialized across
    /// concurrent runs.
    pub environment: String,

    /// Active bootstrap policy (see [`BootstrapPolicy`])
    #[serde(default)]
    pub bootstrap: BootstrapPolicy,

    /// Stages in declaration order
    pub stages: Vec<Stage>,
}

fn default_version() -> String {
    "1".to_string()
}

impl Pipeline {
    /// Load pipeline from a YAML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::ShipflowError> {
        let content =
            std::fs::read_to_string(path).map_err(|_| crate::ShipflowError::PipelineNotFound {
                path: path.to_path_buf(),
            })?;

        Self::from_yaml(&content)
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::ShipflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> Result<String, crate::ShipflowError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Get all stage names in declaration order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

/// A single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name (must be unique within pipeline)
    pub name: String,

    /// Stage description
    #[serde(default)]
    pub description: Option<String>,

    /// What this stage delegates to an external collaborator
    pub action: Action,

    /// Stage dependencies (other stage names)
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Environment variables for this stage's collaborator call only.
    ///
    /// There is no pipeline-global env; configuration is scoped to the call
    /// that needs it.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Stage {
    /// Get the collaborator name for this stage
    pub fn action_name(&self) -> &str {
        match &self.action {
            Action::Test { .. } => "test",
            Action::Provision { .. } => "provision",
            Action::Publish { .. } => "publish",
            Action::UpdateService { .. } => "update_service",
        }
    }

    /// Whether this stage provisions the compute service resource
    pub fn provisions_service(&self) -> bool {
        matches!(
            &self.action,
            Action::Provision {
                scope: ProvisionScope::Full | ProvisionScope::Service,
                ..
            }
        )
    }

    /// Whether this stage publishes an artifact
    pub fn publishes_artifact(&self) -> bool {
        matches!(&self.action, Action::Publish { .. })
    }

    /// Whether this stage repoints a running service at an artifact
    pub fn updates_service(&self) -> bool {
        matches!(&self.action, Action::UpdateService { .. })
    }
}

/// Collaborator action for a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Run the application test suite
    Test {
        /// Test command to run
        command: String,

        /// Shell to use (bash, sh, etc.)
        #[serde(default = "default_shell")]
        shell: String,
    },

    /// Apply declared infrastructure via the provisioner
    Provision {
        /// Directory holding the desired-state declarations
        dir: PathBuf,

        /// Which slice of infrastructure this stage covers
        #[serde(default)]
        scope: ProvisionScope,

        /// Resource targets to restrict the apply to
        #[serde(default)]
        targets: Vec<String>,
    },

    /// Build a container image and push it to a registry
    Publish {
        /// Build context directory
        context: PathBuf,

        /// Dockerfile path (defaults to <context>/Dockerfile)
        #[serde(default)]
        dockerfile: Option<PathBuf>,

        /// Where to push the image
        destination: ValueSource,

        /// Logical artifact name (defaults to the stage name)
        #[serde(default)]
        artifact_name: Option<String>,
    },

    /// Repoint a running service at a published artifact
    UpdateService {
        /// Service identifier on the compute platform
        service: ValueSource,

        /// Upstream stage whose artifact to deploy
        /// (defaults to the sole upstream artifact)
        #[serde(default)]
        artifact_from: Option<String>,
    },
}

fn default_shell() -> String {
    "bash".to_string()
}

/// Which slice of infrastructure a provision stage covers
///
/// The reordering bootstrap policy needs a narrow `registry` sub-stage the
/// publish stage can depend on, and a `service` sub-stage that depends on
/// the publish stage's artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionScope {
    /// Everything declared in the directory
    #[default]
    Full,
    /// Only the image registry
    Registry,
    /// Only the compute service
    Service,
}

impl std::fmt::Display for ProvisionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Registry => write!(f, "registry"),
            Self::Service => write!(f, "service"),
        }
    }
}

/// A value that is either given literally or resolved from an upstream
/// stage's outputs at execution time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSource {
    /// Literal value
    Literal(String),

    /// Key into the merged outputs of successful upstream stages
    FromOutput {
        /// Output key, e.g. `registry_uri`
        from_output: String,
    },
}

impl ValueSource {
    /// The output key this source reads, if any
    pub fn output_key(&self) -> Option<&str> {
        match self {
            Self::FromOutput { from_output } => Some(from_output),
            Self::Literal(_) => None,
        }
    }
}

/// How the first deploy escapes the infrastructure/image circularity
///
/// The service definition references an image tag; on a from-scratch run no
/// tag exists yet. Both policies make "infrastructure exists" and "correct
/// code is running" independently satisfiable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BootstrapPolicy {
    /// Provision the service against a known-good placeholder image on
    /// first creation; an update_service stage repoints it after publish.
    Placeholder {
        /// Placeholder image reference
        #[serde(default = "default_placeholder_image")]
        image: String,
    },

    /// Publish depends only on the registry sub-stage; the service
    /// sub-stage depends on the published artifact, so the service is never
    /// created pointing at a nonexistent tag.
    Reorder,
}

fn default_placeholder_image() -> String {
    "registry.k8s.io/pause:3.9".to_string()
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self::Placeholder {
            image: default_placeholder_image(),
        }
    }
}

impl std::fmt::Display for BootstrapPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placeholder { image } => write!(f, "placeholder ({})", image),
            Self::Reorder => write!(f, "reorder"),
        }
    }
}
