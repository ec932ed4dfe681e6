// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Requests the daemon accepts from the controller (and from attach
//! helpers acting for late clients).

use super::types::LaunchRequest;
use serde::{Deserialize, Serialize};
use stepd_core::ClientEndpoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Liveness probe.
    Ping,
    /// Launch a step (any flavor) on this node.
    Launch { request: Box<LaunchRequest> },
    /// Attach a new client to a running step.
    Attach { job_id: u32, step_id: u32, client: ClientEndpoint },
    /// Report running steps.
    Status,
    /// Stop accepting work and exit once running steps finish.
    Shutdown,
}
