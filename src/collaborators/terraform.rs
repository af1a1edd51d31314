// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Terraform provisioner
//!
//! Applies declared infrastructure by shelling out to `terraform` (or
//! `tofu`). A BLAKE3 hash of the desired-state tree plus the call's
//! variables is kept per environment under `.shipflow/state/`; an unchanged
//! hash short-circuits to the cached outputs without invoking the tool, so
//! re-running a provision stage with unchanged desired state is a no-op.

use async_trait::async_trait;
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{ApplyOutcome, ApplyRequest, Provisioner};
use crate::errors::ShipflowError;

/// Terraform-backed provisioner
pub struct TerraformProvisioner {
    /// Path to the terraform/tofu binary
    bin: PathBuf,

    /// Directory for per-environment applied-state hashes
    state_dir: PathBuf,
}

/// Cached outcome of the last apply for one environment
#[derive(Debug, Serialize, Deserialize)]
struct AppliedState {
    hash: String,
    outputs: BTreeMap<String, String>,
}

impl TerraformProvisioner {
    /// Locate the provisioning tool on PATH and prepare the state directory
    pub fn new(base_dir: &Path) -> Result<Self, ShipflowError> {
        let bin = which::which("terraform")
            .or_else(|_| which::which("tofu"))
            .map_err(|_| ShipflowError::tool_not_found("terraform"))?;

        Self::with_binary(bin, base_dir)
    }

    /// Use a specific binary instead of searching PATH
    pub fn with_binary(bin: PathBuf, base_dir: &Path) -> Result<Self, ShipflowError> {
        let state_dir = base_dir.join(".shipflow").join("state");
        std::fs::create_dir_all(&state_dir).map_err(|e| ShipflowError::StoreError {
            message: format!("Failed to create state directory: {}", e),
        })?;

        Ok(Self { bin, state_dir })
    }

    fn state_path(&self, environment: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", environment))
    }

    /// Hash the desired-state tree together with the call's inputs
    fn desired_state_hash(request: &ApplyRequest) -> Result<String, ShipflowError> {
        let mut hasher = Hasher::new();

        let mut files = Vec::new();
        collect_files(&request.dir, &mut files)?;
        files.sort();

        for file in files {
            hasher.update(file.to_string_lossy().as_bytes());
            let content = std::fs::read(&file).map_err(|e| ShipflowError::Io {
                message: format!("Failed to read {}: {}", file.display(), e),
            })?;
            hasher.update(&content);
        }

        for target in &request.targets {
            hasher.update(target.as_bytes());
        }

        for (k, v) in &request.variables {
            hasher.update(k.as_bytes());
            hasher.update(v.as_bytes());
        }

        Ok(hasher.finalize().to_hex().to_string())
    }

    fn load_applied_state(&self, environment: &str) -> Option<AppliedState> {
        let content = std::fs::read_to_string(self.state_path(environment)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn save_applied_state(
        &self,
        environment: &str,
        state: &AppliedState,
    ) -> Result<(), ShipflowError> {
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(self.state_path(environment), json).map_err(|e| {
            ShipflowError::StoreError {
                message: format!("Failed to write applied state: {}", e),
            }
        })
    }

    fn base_command(&self, request: &ApplyRequest) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg(format!("-chdir={}", request.dir.display()));
        cmd.envs(&request.env);
        cmd
    }

    async fn run_init(&self, request: &ApplyRequest) -> Result<(), ShipflowError> {
        let output = self
            .base_command(request)
            .args(["init", "-input=false", "-no-color"])
            .output()
            .await
            .map_err(|e| ShipflowError::ProvisionError {
                detail: format!("Failed to spawn {}: {}", self.bin.display(), e),
                help: None,
            })?;

        if !output.status.success() {
            return Err(ShipflowError::provision_failed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        Ok(())
    }

    fn apply_args(request: &ApplyRequest) -> Vec<String> {
        let mut args = vec![
            "apply".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];

        for target in &request.targets {
            args.push(format!("-target={}", target));
        }

        for (k, v) in &request.variables {
            args.push("-var".to_string());
            args.push(format!("{}={}", k, v));
        }

        args
    }

    /// Read root-module outputs as plain strings
    async fn read_outputs(
        &self,
        request: &ApplyRequest,
    ) -> Result<BTreeMap<String, String>, ShipflowError> {
        let output = self
            .base_command(request)
            .args(["output", "-json", "-no-color"])
            .output()
            .await
            .map_err(|e| ShipflowError::ProvisionError {
                detail: format!("Failed to read outputs: {}", e),
                help: None,
            })?;

        if !output.status.success() {
            return Err(ShipflowError::provision_failed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;

        let mut outputs = BTreeMap::new();
        if let Some(map) = parsed.as_object() {
            for (name, entry) in map {
                match entry.get("value") {
                    Some(serde_json::Value::String(s)) => {
                        outputs.insert(name.clone(), s.clone());
                    }
                    Some(other) => {
                        outputs.insert(name.clone(), other.to_string());
                    }
                    None => {}
                }
            }
        }

        Ok(outputs)
    }
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ShipflowError> {
        let hash = Self::desired_state_hash(request)?;

        if let Some(applied) = self.load_applied_state(&request.environment) {
            if applied.hash == hash {
                tracing::info!(
                    environment = %request.environment,
                    "desired state unchanged, skipping apply"
                );
                return Ok(ApplyOutcome {
                    outputs: applied.outputs,
                    changed: false,
                });
            }
        }

        self.run_init(request).await?;

        let output = self
            .base_command(request)
            .args(Self::apply_args(request))
            .output()
            .await
            .map_err(|e| ShipflowError::ProvisionError {
                detail: format!("Failed to spawn {}: {}", self.bin.display(), e),
                help: None,
            })?;

        if !output.status.success() {
            return Err(ShipflowError::provision_failed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let outputs = self.read_outputs(request).await?;

        self.save_applied_state(
            &request.environment,
            &AppliedState {
                hash,
                outputs: outputs.clone(),
            },
        )?;

        Ok(ApplyOutcome {
            outputs,
            changed: true,
        })
    }

    async fn plan(&self, request: &ApplyRequest) -> Result<String, ShipflowError> {
        self.run_init(request).await?;

        let output = self
            .base_command(request)
            .args(["plan", "-input=false", "-no-color"])
            .output()
            .await
            .map_err(|e| ShipflowError::ProvisionError {
                detail: format!("Failed to spawn {}: {}", self.bin.display(), e),
                help: None,
            })?;

        if !output.status.success() {
            return Err(ShipflowError::provision_failed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn check_available(&self) -> Result<bool, ShipflowError> {
        Ok(self.bin.exists())
    }
}

/// Recursively collect regular files, skipping tool-managed directories
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), ShipflowError> {
    if !dir.exists() {
        return Err(ShipflowError::Io {
            message: format!("Desired-state directory not found: {}", dir.display()),
        });
    }

    for entry in std::fs::read_dir(dir).map_err(|e| ShipflowError::Io {
        message: format!("Failed to read {}: {}", dir.display(), e),
    })? {
        let entry = entry.map_err(|e| ShipflowError::Io {
            message: format!("Failed to read entry: {}", e),
        })?;
        let path = entry.path();

        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            // .terraform holds providers and local state, not desired state
            if name == ".terraform" || name.starts_with('.') {
                continue;
            }
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }

    Ok(())
}
