// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixture builders shared by tests across the workspace.

use crate::limits::ResourceLimits;
use crate::step::{ClientEndpoint, StepDescriptor, StepFlavor, StepKey, TaskSpec, AUTH_SIG_LEN};
use crate::user::UserIdentity;
use std::path::PathBuf;

/// A minimal interactive step descriptor with `ntasks` tasks running
/// `argv` as the current user. Tests adjust fields after the fact.
pub fn descriptor(job_id: u32, step_id: u32, ntasks: u32, argv: &[&str]) -> StepDescriptor {
    StepDescriptor {
        key: StepKey::new(job_id, step_id),
        flavor: StepFlavor::Interactive,
        node_index: 0,
        node_count: 1,
        total_tasks: ntasks,
        cpus_on_node: ntasks,
        node_list: "localhost".to_string(),
        cpu_groups: vec![(ntasks, 1)],
        tasks: (0..ntasks).map(|i| TaskSpec::new(i, i)).collect(),
        identity: UserIdentity::new(current_uid(), current_gid(), "nobody"),
        cwd: PathBuf::from("/tmp"),
        env: vec![],
        argv: argv.iter().map(|s| s.to_string()).collect(),
        limits: ResourceLimits::new(),
        clients: vec![],
        parallel_debug: false,
        partition_id: None,
        launch_host: None,
    }
}

/// A client endpoint with a valid all-zero auth key and no addresses.
pub fn endpoint() -> ClientEndpoint {
    ClientEndpoint::new(None, None, vec![0u8; AUTH_SIG_LEN])
}

// std has no uid accessor; tests only need a plausible value.
fn current_uid() -> u32 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self").map(|m| m.uid()).unwrap_or(0)
}

fn current_gid() -> u32 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self").map(|m| m.gid()).unwrap_or(0)
}
