// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step descriptor: everything the job manager and session manager need to
//! launch one node's slice of a job step.

use crate::limits::ResourceLimits;
use crate::user::UserIdentity;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Length in bytes of the client authentication signature.
pub const AUTH_SIG_LEN: usize = 128;

/// Step id used by batch jobs, which have no allocated step number.
pub const NO_STEP: u32 = u32::MAX;

/// Identity of a job step: (job id, step id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub job_id: u32,
    pub step_id: u32,
}

impl StepKey {
    pub fn new(job_id: u32, step_id: u32) -> Self {
        Self { job_id, step_id }
    }

    /// Key for a batch job, which owns the whole-job pseudo step.
    pub fn batch(job_id: u32) -> Self {
        Self { job_id, step_id: NO_STEP }
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.step_id == NO_STEP {
            write!(f, "{}", self.job_id)
        } else {
            write!(f, "{}.{}", self.job_id, self.step_id)
        }
    }
}

/// Launch flavor of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFlavor {
    /// Ordinary task launch: framed stdio to remote clients.
    Interactive,
    /// Batch script: stdio to files, completion reported to the controller.
    Batch,
    /// Single task with stdio connected directly to one client socket.
    Spawn,
}

crate::simple_display! {
    StepFlavor {
        Interactive => "interactive",
        Batch => "batch",
        Spawn => "spawn",
    }
}

/// One local task of a step.
///
/// The `child_*` fields carry the task-side pipe file descriptors across
/// the exec into the session manager; they are `None` until the job
/// manager has created the pipes (and always `None` in spawn flavor,
/// where the task inherits a socket instead).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Index of this task on this node (0..ntasks).
    pub local_id: u32,
    /// Index of this task within the whole step.
    pub global_id: u32,
    pub child_stdin: Option<i32>,
    pub child_stdout: Option<i32>,
    pub child_stderr: Option<i32>,
}

impl TaskSpec {
    pub fn new(local_id: u32, global_id: u32) -> Self {
        Self { local_id, global_id, child_stdin: None, child_stdout: None, child_stderr: None }
    }
}

/// A remote endpoint consuming task output and providing task input.
///
/// `io_addr` is the address the launcher connects back to for framed task
/// traffic; `resp_addr` receives launch/exit notifications. Either may be
/// absent (e.g. a batch step has no live client). The per-stream path
/// overrides redirect that stream to a local file instead of the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEndpoint {
    pub io_addr: Option<SocketAddr>,
    pub resp_addr: Option<SocketAddr>,
    /// Shared authentication signature, exactly [`AUTH_SIG_LEN`] bytes.
    pub auth_key: Vec<u8>,
    pub stdin_path: Option<PathBuf>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}

impl ClientEndpoint {
    pub fn new(io_addr: Option<SocketAddr>, resp_addr: Option<SocketAddr>, key: Vec<u8>) -> Self {
        Self {
            io_addr,
            resp_addr,
            auth_key: key,
            stdin_path: None,
            stdout_path: None,
            stderr_path: None,
        }
    }

    /// True when the signature has the mandated length.
    pub fn key_valid(&self) -> bool {
        self.auth_key.len() == AUTH_SIG_LEN
    }
}

/// Full description of one node's slice of a job step.
///
/// Built once by the launch dispatcher and then treated as immutable: the
/// job manager fills in the task pipe fds before handing a serialized copy
/// to the session manager, but nothing else changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub key: StepKey,
    pub flavor: StepFlavor,

    /// Index of this node within the step's node allocation.
    pub node_index: u32,
    /// Number of nodes participating in the step.
    pub node_count: u32,
    /// Total number of tasks across all nodes.
    pub total_tasks: u32,
    /// CPUs allocated to the step on this node.
    pub cpus_on_node: u32,
    /// Ranged host list of all nodes in the step (e.g. `host[0-3]`).
    pub node_list: String,
    /// (cpus, repetition) groups describing task placement across nodes.
    pub cpu_groups: Vec<(u32, u32)>,

    pub tasks: Vec<TaskSpec>,
    pub identity: UserIdentity,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub argv: Vec<String>,
    pub limits: ResourceLimits,
    pub clients: Vec<ClientEndpoint>,

    /// Cooperate with a parallel debugger: trace-stop each task on exec.
    pub parallel_debug: bool,
    /// Interconnect partition identifier, when the fabric uses one.
    pub partition_id: Option<String>,
    /// Address of the node the launching command runs on.
    pub launch_host: Option<String>,
}

impl StepDescriptor {
    /// Number of tasks on this node.
    pub fn ntasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_batch(&self) -> bool {
        self.flavor == StepFlavor::Batch
    }

    pub fn is_spawn(&self) -> bool {
        self.flavor == StepFlavor::Spawn
    }

    /// Local task id owning `global_id`, if it runs on this node.
    pub fn local_of_global(&self, global_id: u32) -> Option<u32> {
        self.tasks.iter().find(|t| t.global_id == global_id).map(|t| t.local_id)
    }

    /// Sanity-check the descriptor before launch.
    pub fn validate(&self) -> Result<(), String> {
        if self.tasks.is_empty() {
            return Err("step has no tasks".to_string());
        }
        if self.is_spawn() && self.tasks.len() != 1 {
            return Err(format!("spawn step must have exactly one task, got {}", self.tasks.len()));
        }
        for (i, t) in self.tasks.iter().enumerate() {
            if t.local_id as usize != i {
                return Err(format!("task {} has local_id {}", i, t.local_id));
            }
        }
        if self.argv.is_empty() {
            return Err("step has empty argv".to_string());
        }
        for c in &self.clients {
            if !c.auth_key.is_empty() && !c.key_valid() {
                return Err(format!("client auth key must be {} bytes", AUTH_SIG_LEN));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
