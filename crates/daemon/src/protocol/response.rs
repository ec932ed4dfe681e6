// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Responses the daemon returns on the request connection.

use super::types::StepStatusEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Ok,
    /// The step was accepted and its job manager is running.
    Launched { job_id: u32, step_id: u32 },
    Status { steps: Vec<StepStatusEntry> },
    ShuttingDown,
    Error { message: String },
}
