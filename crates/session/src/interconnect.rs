// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interconnect plugin seam.
//!
//! The high-performance fabric is an external plugin; the launcher only
//! honors its lifecycle contract. Calls are ordered around the privilege
//! boundaries: `preinit` in the job manager (root), `init` in the session
//! manager while still privileged, `attach` after demotion immediately
//! before each task exec, `fini` after the last reap, `postfini` back in
//! the job manager.

use stepd_core::StepKey;

/// Failure from the fabric plugin; always fatal for the affected phase.
#[derive(Debug, thiserror::Error)]
#[error("interconnect: {0}")]
pub struct InterconnectError(pub String);

/// Per-task context handed to `attach`.
#[derive(Debug, Clone, Copy)]
pub struct AttachCtx {
    pub node_index: u32,
    pub node_count: u32,
    pub total_tasks: u32,
    pub local_id: u32,
    pub global_id: u32,
}

/// Lifecycle contract of the fabric plugin.
///
/// Implementations must be callable from both the daemon process and the
/// demoted session-manager child.
pub trait Interconnect: Send + Sync {
    /// Node-side preparation, invoked by the job manager as root.
    fn preinit(&self, _key: &StepKey) -> Result<(), InterconnectError> {
        Ok(())
    }

    /// Program the fabric for the step; runs in the session manager
    /// before user demotion.
    fn init(&self, _key: &StepKey, _uid: u32) -> Result<(), InterconnectError> {
        Ok(())
    }

    /// Bind one task to the fabric; returns environment additions for
    /// that task. Runs demoted, immediately before exec.
    fn attach(&self, _key: &StepKey, _ctx: AttachCtx) -> Result<Vec<(String, String)>, InterconnectError> {
        Ok(Vec::new())
    }

    /// Release per-session fabric state after the last task is reaped.
    fn fini(&self, _key: &StepKey) -> Result<(), InterconnectError> {
        Ok(())
    }

    /// Final node-side cleanup in the job manager; may kill stragglers.
    fn postfini(&self, _key: &StepKey, _session_pid: i32) -> Result<(), InterconnectError> {
        Ok(())
    }
}

/// Plugin used when no fabric is configured; every phase is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInterconnect;

impl Interconnect for NullInterconnect {}
