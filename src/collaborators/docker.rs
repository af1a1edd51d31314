// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Docker image publisher
//!
//! Builds the stage's context with `docker build` and pushes the result
//! with `docker push`. Build and push failures are reported separately so
//! the run record shows which side effect actually happened.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use super::{ImagePublisher, PublishRequest};
use crate::errors::ShipflowError;
use crate::pipeline::ArtifactReference;

/// Docker-backed image builder/publisher
pub struct DockerPublisher {
    /// Path to the docker binary
    bin: PathBuf,
}

impl DockerPublisher {
    /// Locate the docker binary
    pub fn new() -> Result<Self, ShipflowError> {
        let bin = which::which("docker").map_err(|_| ShipflowError::tool_not_found("docker"))?;
        Ok(Self { bin })
    }
}

#[async_trait]
impl ImagePublisher for DockerPublisher {
    async fn build_and_publish(
        &self,
        request: &PublishRequest,
    ) -> Result<ArtifactReference, ShipflowError> {
        let image_ref = format!("{}:{}", request.destination, request.tag);

        let mut build = Command::new(&self.bin);
        build.arg("build").arg("-t").arg(&image_ref);

        if let Some(ref dockerfile) = request.dockerfile {
            build.arg("-f").arg(dockerfile);
        }

        build.arg(&request.context);
        build.envs(&request.env);

        tracing::info!(image = %image_ref, "building image");

        let output = build.output().await.map_err(|e| ShipflowError::BuildError {
            detail: format!("Failed to spawn docker: {}", e),
        })?;

        if !output.status.success() {
            return Err(ShipflowError::BuildError {
                detail: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        tracing::info!(image = %image_ref, "pushing image");

        let output = Command::new(&self.bin)
            .arg("push")
            .arg(&image_ref)
            .envs(&request.env)
            .output()
            .await
            .map_err(|e| ShipflowError::PublishError {
                detail: format!("Failed to spawn docker: {}", e),
            })?;

        if !output.status.success() {
            return Err(ShipflowError::PublishError {
                detail: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(ArtifactReference::published(
            &request.name,
            &request.destination,
            &request.tag,
        ))
    }

    async fn check_available(&self) -> Result<bool, ShipflowError> {
        Ok(self.bin.exists())
    }
}
