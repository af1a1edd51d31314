// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Filesystem-based run record store
//!
//! One JSON file per run under the store directory. A run's file is
//! rewritten as its transitions accumulate so partial progress is
//! observable, but files of past runs are never touched by later runs.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::ShipflowError;
use crate::pipeline::ArtifactReference;
use crate::run::{RunRecord, StageOutcome};

/// Filesystem run record store
pub struct RunStore {
    store_dir: PathBuf,
}

impl RunStore {
    /// Create a store rooted at the given directory
    pub fn new(store_dir: PathBuf) -> Result<Self, ShipflowError> {
        if !store_dir.exists() {
            std::fs::create_dir_all(&store_dir).map_err(|e| ShipflowError::StoreError {
                message: format!("Failed to create run store directory: {}", e),
            })?;
        }

        Ok(Self { store_dir })
    }

    /// Store under the conventional `.shipflow/runs` location
    pub fn default_store(base_dir: &Path) -> Result<Self, ShipflowError> {
        Self::new(base_dir.join(".shipflow").join("runs"))
    }

    fn run_path(&self, id: Uuid) -> PathBuf {
        self.store_dir.join(format!("{}.json", id))
    }

    /// Persist the current state of a run record
    pub async fn save(&self, record: &RunRecord) -> Result<(), ShipflowError> {
        let json = serde_json::to_string_pretty(record)?;

        tokio::fs::write(self.run_path(record.id), json)
            .await
            .map_err(|e| ShipflowError::StoreError {
                message: format!("Failed to write run record: {}", e),
            })
    }

    /// Load a run record by identifier
    pub async fn load(&self, id: Uuid) -> Result<RunRecord, ShipflowError> {
        let path = self.run_path(id);

        if !path.exists() {
            return Err(ShipflowError::RunNotFound { id: id.to_string() });
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ShipflowError::StoreError {
                message: format!("Failed to read run record: {}", e),
            })?;

        Ok(serde_json::from_str(&content)?)
    }

    /// All run records, newest first
    pub async fn list(&self) -> Result<Vec<RunRecord>, ShipflowError> {
        let mut records = Vec::new();

        let mut entries =
            tokio::fs::read_dir(&self.store_dir)
                .await
                .map_err(|e| ShipflowError::StoreError {
                    message: format!("Failed to read run store directory: {}", e),
                })?;

        while let Some(entry) =
            entries.next_entry().await.map_err(|e| ShipflowError::StoreError {
                message: format!("Failed to read run store entry: {}", e),
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            // Skip unreadable or foreign files rather than failing the listing
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                if let Ok(record) = serde_json::from_str::<RunRecord>(&content) {
                    records.push(record);
                }
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }

    /// Most recent artifact reference from a run in which the stage succeeded
    pub async fn last_artifact(
        &self,
        stage_name: &str,
    ) -> Result<Option<ArtifactReference>, ShipflowError> {
        for record in self.list().await? {
            if record.outcome_of(stage_name) == StageOutcome::Succeeded {
                if let Some(artifact) = record.artifacts.get(stage_name) {
                    return Ok(Some(artifact.clone()));
                }
            }
        }

        Ok(None)
    }

    /// Most recently published artifact across an environment's runs
    ///
    /// Used by the placeholder bootstrap policy to decide whether a service
    /// can be provisioned against a real image or still needs the
    /// placeholder. Runs for other environments never leak in, even when
    /// one store serves several environments.
    pub async fn latest_artifact(
        &self,
        environment: &str,
    ) -> Result<Option<ArtifactReference>, ShipflowError> {
        let mut newest: Option<ArtifactReference> = None;

        for record in self.list().await? {
            if record.environment != environment {
                continue;
            }
            for artifact in record.artifacts.values() {
                let is_newer = newest
                    .as_ref()
                    .map(|n| artifact.published_at > n.published_at)
                    .unwrap_or(true);
                if is_newer {
                    newest = Some(artifact.clone());
                }
            }
        }

        Ok(newest)
    }
}
