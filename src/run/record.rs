// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Run records
//!
//! A run record is the append-only audit trail of one pipeline invocation:
//! trigger, per-stage outcome transitions with timestamps, and the artifact
//! references produced. Once sealed with a terminal status it accepts no
//! further transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::pipeline::ArtifactReference;

/// What a stage ended up as for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageOutcome {
    /// Terminal outcomes never transition again within a run
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The event that started a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// Revision identifier pushed to the tracked branch
    pub revision: String,

    /// Branch name, if known
    #[serde(default)]
    pub branch: Option<String>,

    /// When the trigger was received
    pub received_at: DateTime<Utc>,
}

impl Trigger {
    /// Trigger for a revision pushed right now
    pub fn revision(revision: &str) -> Self {
        Self {
            revision: revision.to_string(),
            branch: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }
}

/// One appended stage outcome transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    /// Stage name
    pub stage: String,

    /// New outcome
    pub outcome: StageOutcome,

    /// When the transition happened
    pub at: DateTime<Utc>,

    /// Error or skip detail, if any
    #[serde(default)]
    pub detail: Option<String>,
}

/// Execution history of one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier
    pub id: Uuid,

    /// Pipeline name this run executed
    pub pipeline: String,

    /// Target environment
    pub environment: String,

    /// What started the run
    pub trigger: Trigger,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Append-only stage transition log
    pub transitions: Vec<StageTransition>,

    /// Artifact references produced, by stage name
    pub artifacts: BTreeMap<String, ArtifactReference>,

    /// Overall status
    pub status: RunStatus,
}

impl RunRecord {
    /// Create a fresh record for a triggered run
    pub fn begin(pipeline: &str, environment: &str, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.to_string(),
            environment: environment.to_string(),
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            transitions: Vec::new(),
            artifacts: BTreeMap::new(),
            status: RunStatus::Running,
        }
    }

    /// Whether the run has reached a terminal state
    pub fn is_sealed(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// Append a stage transition. Sealed records reject appends.
    pub fn record(&mut self, stage: &str, outcome: StageOutcome, detail: Option<String>) {
        if self.is_sealed() {
            tracing::warn!(stage, %outcome, "transition after seal dropped");
            return;
        }

        self.transitions.push(StageTransition {
            stage: stage.to_string(),
            outcome,
            at: Utc::now(),
            detail,
        });
    }

    /// Attach the artifact a stage produced
    pub fn record_artifact(&mut self, stage: &str, artifact: ArtifactReference) {
        if self.is_sealed() {
            return;
        }
        self.artifacts.insert(stage.to_string(), artifact);
    }

    /// Latest recorded outcome for a stage
    pub fn outcome_of(&self, stage: &str) -> StageOutcome {
        self.transitions
            .iter()
            .rev()
            .find(|t| t.stage == stage)
            .map(|t| t.outcome)
            .unwrap_or(StageOutcome::Pending)
    }

    /// Seal the record with a terminal status. Only the first seal sticks.
    pub fn seal(&mut self, status: RunStatus) {
        if self.is_sealed() {
            return;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Stage names that ended in the given outcome
    pub fn stages_with_outcome(&self, outcome: StageOutcome) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.transitions
            .iter()
            .rev()
            .filter(|t| seen.insert(t.stage.as_str()))
            .filter(|t| t.outcome == outcome)
            .map(|t| t.stage.as_str())
            .collect()
    }
}
