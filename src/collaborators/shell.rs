// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Shell test runner
//!
//! Runs the application test command through a shell and reports pass/fail
//! plus the combined log.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::process::Command;

use super::{TestReport, TestRunner};
use crate::errors::ShipflowError;

/// Shell-backed test runner
pub struct ShellTestRunner;

impl ShellTestRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellTestRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    async fn run(
        &self,
        command: &str,
        shell: &str,
        dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<TestReport, ShipflowError> {
        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(command);
        cmd.current_dir(dir);
        cmd.envs(env);

        let output = cmd.output().await.map_err(|e| ShipflowError::Io {
            message: format!("Failed to spawn shell '{}': {}", shell, e),
        })?;

        let mut log = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !log.is_empty() {
                log.push('\n');
            }
            log.push_str(&stderr);
        }

        Ok(TestReport {
            passed: output.status.success(),
            log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passing_command() {
        let runner = ShellTestRunner::new();
        let report = runner
            .run("echo ok", "bash", Path::new("."), &HashMap::new())
            .await
            .unwrap();

        assert!(report.passed);
        assert!(report.log.contains("ok"));
    }

    #[tokio::test]
    async fn test_failing_command_captures_log() {
        let runner = ShellTestRunner::new();
        let report = runner
            .run("echo boom >&2; exit 1", "bash", Path::new("."), &HashMap::new())
            .await
            .unwrap();

        assert!(!report.passed);
        assert!(report.log.contains("boom"));
    }
}
