// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Provisioning locks
//!
//! Declared infrastructure is a single shared resource per environment, so
//! provisioning must be serialized across concurrent runs targeting the
//! same environment. Publish stages are not serialized; each produces a
//! distinct immutable artifact.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async locks keyed by environment identifier
#[derive(Default)]
pub struct EnvironmentLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EnvironmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for an environment, waiting if another run holds it
    pub async fn acquire(&self, environment: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(environment.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        lock.lock_owned().await
    }
}
