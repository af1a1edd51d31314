// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Artifact references
//!
//! An artifact reference is the immutable identifier a publish stage emits
//! and later stages (service updates, subsequent runs) consume. It is never
//! mutated after creation; "most recent" always means the latest successful
//! publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable pointer to a published image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReference {
    /// Logical name of the buildable unit
    pub name: String,

    /// Registry/repository the artifact was pushed to
    pub repository: String,

    /// Version tag, unique per publish event
    pub tag: String,

    /// When the publish completed
    pub published_at: DateTime<Utc>,
}

impl ArtifactReference {
    /// Create a reference for an artifact published right now
    pub fn published(name: &str, repository: &str, tag: &str) -> Self {
        Self {
            name: name.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
            published_at: Utc::now(),
        }
    }

    /// Full image reference as a runtime would pull it
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

impl std::fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.image_ref(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_format() {
        let artifact = ArtifactReference::published("app", "registry.example/app", "rev123");
        assert_eq!(artifact.image_ref(), "registry.example/app:rev123");
    }

    #[test]
    fn test_serde_round_trip() {
        let artifact = ArtifactReference::published("app", "registry.example/app", "abc1234");
        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: ArtifactReference = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, artifact);
    }
}
