// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Command-template service updater
//!
//! Repoints a running service at a published artifact by running a
//! configurable command template, e.g. for AWS App Runner:
//!
//! ```text
//! SHIPFLOW_UPDATE_CMD='aws apprunner update-service \
//!     --service-arn {service} \
//!     --source-configuration ImageRepository={image}'
//! ```
//!
//! `{service}` and `{image}` are substituted per call.

use async_trait::async_trait;
use tokio::process::Command;

use super::ServiceUpdater;
use crate::errors::ShipflowError;
use crate::pipeline::ArtifactReference;

/// Environment variable holding the update command template
pub const UPDATE_CMD_ENV: &str = "SHIPFLOW_UPDATE_CMD";

/// Service updater backed by a shell command template
pub struct CommandServiceUpdater {
    template: Option<String>,
    shell: String,
}

impl CommandServiceUpdater {
    pub fn new(template: &str) -> Self {
        Self {
            template: Some(template.to_string()),
            shell: "bash".to_string(),
        }
    }

    /// Read the template from `SHIPFLOW_UPDATE_CMD`; an unset variable
    /// yields an updater that fails with guidance when first used
    pub fn from_env() -> Self {
        Self {
            template: std::env::var(UPDATE_CMD_ENV).ok(),
            shell: "bash".to_string(),
        }
    }

    fn render(&self, service_id: &str, artifact: &ArtifactReference) -> Result<String, ShipflowError> {
        let template = self.template.as_ref().ok_or_else(|| ShipflowError::UpdateError {
            service: service_id.to_string(),
            detail: format!("No update command configured; set {}", UPDATE_CMD_ENV),
        })?;

        Ok(template
            .replace("{service}", service_id)
            .replace("{image}", &artifact.image_ref()))
    }
}

#[async_trait]
impl ServiceUpdater for CommandServiceUpdater {
    async fn update_service(
        &self,
        service_id: &str,
        artifact: &ArtifactReference,
    ) -> Result<(), ShipflowError> {
        let command = self.render(service_id, artifact)?;

        tracing::info!(service = service_id, image = %artifact.image_ref(), "updating service");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&command)
            .output()
            .await
            .map_err(|e| ShipflowError::UpdateError {
                service: service_id.to_string(),
                detail: format!("Failed to spawn shell: {}", e),
            })?;

        if !output.status.success() {
            return Err(ShipflowError::UpdateError {
                service: service_id.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_placeholders() {
        let updater = CommandServiceUpdater::new("update {service} to {image}");
        let artifact = ArtifactReference::published("app", "registry.example/app", "rev123");

        let rendered = updater.render("svc-1", &artifact).unwrap();
        assert_eq!(rendered, "update svc-1 to registry.example/app:rev123");
    }

    #[test]
    fn test_missing_template_is_an_update_error() {
        let updater = CommandServiceUpdater {
            template: None,
            shell: "bash".into(),
        };
        let artifact = ArtifactReference::published("app", "registry.example/app", "rev123");

        let result = updater.render("svc-1", &artifact);
        assert!(matches!(result, Err(ShipflowError::UpdateError { .. })));
    }

    #[tokio::test]
    async fn test_update_runs_command() {
        let updater = CommandServiceUpdater::new("test -n '{service}' && test -n '{image}'");
        let artifact = ArtifactReference::published("app", "registry.example/app", "rev123");

        updater.update_service("svc-1", &artifact).await.unwrap();
    }
}
