// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! External collaborators
//!
//! The orchestrator delegates all real work to four collaborators behind
//! async traits: the cloud resource provisioner, the image
//! builder/publisher, the application test runner, and the compute-platform
//! service updater. Command-line implementations live in this module; tests
//! substitute mocks.

mod docker;
mod service;
mod shell;
mod terraform;

pub use docker::DockerPublisher;
pub use service::CommandServiceUpdater;
pub use shell::ShellTestRunner;
pub use terraform::TerraformProvisioner;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::ShipflowError;
use crate::pipeline::ArtifactReference;

/// One provisioner apply/plan invocation
///
/// Credentials and variables are scoped to the call; nothing is shared
/// across stages through ambient state.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    /// Environment identifier (also the provisioning lock key)
    pub environment: String,

    /// Directory holding the desired-state declarations
    pub dir: PathBuf,

    /// Resource targets to restrict the apply to (empty = everything)
    pub targets: Vec<String>,

    /// Variables passed to the provisioner for this call only
    pub variables: BTreeMap<String, String>,

    /// Environment variables for the tool process
    pub env: HashMap<String, String>,
}

/// Outcome of a provisioner apply
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Named outputs of the desired state (e.g. registry_uri, service_id)
    pub outputs: BTreeMap<String, String>,

    /// Whether any resource actually changed
    pub changed: bool,
}

/// Cloud resource provisioner
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create/update declared infrastructure. Idempotent for an unchanged
    /// desired state.
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ShipflowError>;

    /// Read-only diff of what an apply would change
    async fn plan(&self, request: &ApplyRequest) -> Result<String, ShipflowError>;

    /// Check if the provisioning tool is available
    async fn check_available(&self) -> Result<bool, ShipflowError>;
}

/// One image build-and-publish invocation
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Logical artifact name
    pub name: String,

    /// Build context directory
    pub context: PathBuf,

    /// Dockerfile path (defaults to <context>/Dockerfile)
    pub dockerfile: Option<PathBuf>,

    /// Repository to push to
    pub destination: String,

    /// Tag for this publish event (revision identifier)
    pub tag: String,

    /// Environment variables for the tool process
    pub env: HashMap<String, String>,
}

/// Container image builder and publisher
#[async_trait]
pub trait ImagePublisher: Send + Sync {
    /// Build the context and push the image, returning the immutable
    /// reference of the published artifact
    async fn build_and_publish(
        &self,
        request: &PublishRequest,
    ) -> Result<ArtifactReference, ShipflowError>;

    /// Check if the build tool is available
    async fn check_available(&self) -> Result<bool, ShipflowError>;
}

/// Result of a test run
#[derive(Debug, Clone)]
pub struct TestReport {
    pub passed: bool,
    pub log: String,
}

/// Application test runner
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run the test command against the source tree
    async fn run(
        &self,
        command: &str,
        shell: &str,
        dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<TestReport, ShipflowError>;
}

/// Compute-platform service updater
#[async_trait]
pub trait ServiceUpdater: Send + Sync {
    /// Repoint the running service at the given artifact
    async fn update_service(
        &self,
        service_id: &str,
        artifact: &ArtifactReference,
    ) -> Result<(), ShipflowError>;
}

/// Bundle of collaborators the orchestrator executes stages against
#[derive(Clone)]
pub struct Collaborators {
    pub provisioner: Arc<dyn Provisioner>,
    pub publisher: Arc<dyn ImagePublisher>,
    pub test_runner: Arc<dyn TestRunner>,
    pub service_updater: Arc<dyn ServiceUpdater>,
}

impl Collaborators {
    /// Command-line collaborators (terraform, docker, shell) rooted at the
    /// given working directory
    pub fn command_line(base_dir: &Path) -> Result<Self, ShipflowError> {
        Ok(Self {
            provisioner: Arc::new(TerraformProvisioner::new(base_dir)?),
            publisher: Arc::new(DockerPublisher::new()?),
            test_runner: Arc::new(ShellTestRunner::new()),
            service_updater: Arc::new(CommandServiceUpdater::from_env()),
        })
    }
}
