// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Run records and their persistence
//!
//! A run record is created at trigger time, appended to as stages
//! transition, and sealed once the pipeline reaches a terminal state.
//! Records are retained on disk for audit and for resolving the most
//! recent artifact reference per stage.

mod record;
mod store;

pub use record::{RunRecord, RunStatus, StageOutcome, StageTransition, Trigger};
pub use store::RunStore;
