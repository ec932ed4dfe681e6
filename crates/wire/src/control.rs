// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-pipe records between the session manager and the job manager.
//!
//! Startup: one pid record per task, written in local-task-id order.
//! Afterwards: one exit record per reaped task. Both sides run on the same
//! node, so fields use native byte order.

use crate::ProtocolError;

/// Encoded size of a pid record.
pub const PID_RECORD_LEN: usize = 4;

/// Encoded size of an exit record.
pub const EXIT_RECORD_LEN: usize = 8;

/// A task pid, reported once immediately after the fork succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidRecord(pub i32);

impl PidRecord {
    pub fn encode(&self) -> [u8; PID_RECORD_LEN] {
        self.0.to_ne_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < PID_RECORD_LEN {
            return Err(ProtocolError::Truncated { need: PID_RECORD_LEN, got: buf.len() });
        }
        Ok(Self(i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]])))
    }
}

/// A task exit, reported once when the session manager reaps the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRecord {
    /// Local task index on this node.
    pub task_index: u32,
    /// Raw wait status of the task.
    pub status: i32,
}

impl ExitRecord {
    pub fn new(task_index: u32, status: i32) -> Self {
        Self { task_index, status }
    }

    pub fn encode(&self) -> [u8; EXIT_RECORD_LEN] {
        let mut buf = [0u8; EXIT_RECORD_LEN];
        buf[..4].copy_from_slice(&self.task_index.to_ne_bytes());
        buf[4..].copy_from_slice(&self.status.to_ne_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < EXIT_RECORD_LEN {
            return Err(ProtocolError::Truncated { need: EXIT_RECORD_LEN, got: buf.len() });
        }
        Ok(Self {
            task_index: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            status: i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
