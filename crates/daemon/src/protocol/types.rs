// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol payload types shared by requests and notifications.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stepd_core::{
    ClientEndpoint, ResourceLimits, StepDescriptor, StepFlavor, StepKey, TaskSpec, UserIdentity,
};

/// Everything the controller must supply to launch one node's slice of a
/// step. The dispatcher turns this into a [`StepDescriptor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub job_id: u32,
    pub step_id: u32,
    pub flavor: StepFlavor,

    pub node_index: u32,
    pub node_count: u32,
    pub total_tasks: u32,
    pub cpus_on_node: u32,
    pub node_list: String,
    pub cpu_groups: Vec<(u32, u32)>,
    /// Global task id for each local task, in local order.
    pub global_task_ids: Vec<u32>,

    pub identity: UserIdentity,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub argv: Vec<String>,
    pub limits: ResourceLimits,
    pub clients: Vec<ClientEndpoint>,

    pub parallel_debug: bool,
    pub partition_id: Option<String>,
    /// Submitted script body; batch flavor only.
    pub script: Option<String>,
}

impl LaunchRequest {
    /// Build the immutable step descriptor (task pipe fds unset).
    pub fn into_descriptor(self, launch_host: Option<String>) -> StepDescriptor {
        let tasks = self
            .global_task_ids
            .iter()
            .enumerate()
            .map(|(i, gid)| TaskSpec::new(i as u32, *gid))
            .collect();
        StepDescriptor {
            key: StepKey::new(self.job_id, self.step_id),
            flavor: self.flavor,
            node_index: self.node_index,
            node_count: self.node_count,
            total_tasks: self.total_tasks,
            cpus_on_node: self.cpus_on_node,
            node_list: self.node_list,
            cpu_groups: self.cpu_groups,
            tasks,
            identity: self.identity,
            cwd: self.cwd,
            env: self.env,
            argv: self.argv,
            limits: self.limits,
            clients: self.clients,
            parallel_debug: self.parallel_debug,
            partition_id: self.partition_id,
            launch_host,
        }
    }
}

/// Notifications pushed to a client's response endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Result of the launch phase; `pids` is empty on failure.
    LaunchResult { node_name: String, node_index: u32, return_code: i32, pids: Vec<i32> },
    /// A batch of tasks finished with the same raw wait status.
    TaskExited { task_ids: Vec<u32>, status: i32 },
}

/// Notifications pushed to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMsg {
    /// A batch step finished on this node.
    StepComplete { job_id: u32, node_name: String, step_rc: i32, task_rc: i32 },
}

/// One running step in a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatusEntry {
    pub job_id: u32,
    pub step_id: u32,
    pub state: String,
    pub session_pid: Option<i32>,
    pub ntasks: u32,
}
