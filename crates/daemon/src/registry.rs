// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node-wide step registry.
//!
//! One record per running step, single-writer (the step's job manager)
//! and multi-reader behind a mutex. Duplicate (job id, step id) insertion
//! is refused, which is how a concurrently retried launch gets bounced.
//! The registry also forwards attach requests from the listener into the
//! right job manager: an mpsc channel carries the endpoint, a byte on
//! the paired pipe pulls the manager out of its poll.

use crate::protocol::StepStatusEntry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::mpsc::{Receiver, Sender};
use stepd_core::{ClientEndpoint, StepKey};

/// Lifecycle of a step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Created,
    Started,
    Ending,
    Complete,
}

stepd_core::simple_display! {
    StepState {
        Created => "created",
        Started => "started",
        Ending => "ending",
        Complete => "complete",
    }
}

/// Why a registry operation was refused.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("step already exists")]
    Exists,
    #[error("too many steps on this node")]
    Full,
    #[error("no such step")]
    NotFound,
}

/// Receiving side of a step's attach channel, owned by its job manager.
#[derive(Debug)]
pub struct AttachChannel {
    pub rx: Receiver<ClientEndpoint>,
    pub pipe_rd: OwnedFd,
}

struct Entry {
    state: StepState,
    session_pid: Option<i32>,
    ntasks: u32,
    attach_tx: Sender<ClientEndpoint>,
    attach_wake: OwnedFd,
}

/// Shared map of running steps.
pub struct StepRegistry {
    steps: Mutex<HashMap<StepKey, Entry>>,
    capacity: usize,
}

impl StepRegistry {
    pub fn new(capacity: usize) -> Self {
        Self { steps: Mutex::new(HashMap::new()), capacity }
    }

    /// Create the record for a new step and hand back its attach channel.
    pub fn insert(&self, key: StepKey, ntasks: u32) -> Result<AttachChannel, RegistryError> {
        let mut steps = self.steps.lock();
        if steps.contains_key(&key) {
            return Err(RegistryError::Exists);
        }
        if steps.len() >= self.capacity {
            return Err(RegistryError::Full);
        }
        let (pipe_rd, pipe_wr) = stepd_sys::pipe_pair().map_err(|_| RegistryError::Full)?;
        let _ = stepd_sys::set_nonblocking(pipe_rd.as_fd());
        let _ = stepd_sys::set_nonblocking(pipe_wr.as_fd());
        let _ = stepd_sys::set_cloexec(pipe_rd.as_fd());
        let _ = stepd_sys::set_cloexec(pipe_wr.as_fd());

        let (tx, rx) = std::sync::mpsc::channel();
        steps.insert(
            key,
            Entry {
                state: StepState::Created,
                session_pid: None,
                ntasks,
                attach_tx: tx,
                attach_wake: pipe_wr,
            },
        );
        Ok(AttachChannel { rx, pipe_rd })
    }

    pub fn set_state(&self, key: &StepKey, state: StepState) {
        if let Some(entry) = self.steps.lock().get_mut(key) {
            entry.state = state;
        }
    }

    pub fn set_session_pid(&self, key: &StepKey, pid: i32) {
        if let Some(entry) = self.steps.lock().get_mut(key) {
            entry.session_pid = Some(pid);
        }
    }

    /// Route a new client to the step's job manager.
    pub fn attach(&self, key: &StepKey, client: ClientEndpoint) -> Result<(), RegistryError> {
        let steps = self.steps.lock();
        let entry = steps.get(key).ok_or(RegistryError::NotFound)?;
        entry.attach_tx.send(client).map_err(|_| RegistryError::NotFound)?;
        // wake byte; a full pipe already means a pending wakeup
        let _ = nix::unistd::write(entry.attach_wake.as_fd(), &[1u8]);
        Ok(())
    }

    pub fn remove(&self, key: &StepKey) {
        self.steps.lock().remove(key);
    }

    pub fn contains(&self, key: &StepKey) -> bool {
        self.steps.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.steps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.lock().is_empty()
    }

    /// Snapshot for status reporting.
    pub fn snapshot(&self) -> Vec<StepStatusEntry> {
        let steps = self.steps.lock();
        let mut entries: Vec<StepStatusEntry> = steps
            .iter()
            .map(|(key, e)| StepStatusEntry {
                job_id: key.job_id,
                step_id: key.step_id,
                state: e.state.to_string(),
                session_pid: e.session_pid,
                ntasks: e.ntasks,
            })
            .collect();
        entries.sort_by_key(|e| (e.job_id, e.step_id));
        entries
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
