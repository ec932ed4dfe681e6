// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical task environment construction.
//!
//! Every task receives the user's requested environment plus the step
//! variables below, set (or overridden) just before exec.

use crate::step::StepDescriptor;

/// Set `key` in an environment list, replacing an existing entry.
pub fn set_env(env: &mut Vec<(String, String)>, key: &str, value: String) {
    if let Some(e) = env.iter_mut().find(|(k, _)| k == key) {
        e.1 = value;
    } else {
        env.push((key.to_string(), value));
    }
}

/// Look up `key` in an environment list.
pub fn get_env<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Render the per-node task placement as a ranged count string,
/// e.g. `2(x3),1` for three nodes with two tasks and one with one.
pub fn tasks_per_node_string(cpu_groups: &[(u32, u32)]) -> String {
    let mut out = String::new();
    for (i, (count, reps)) in cpu_groups.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if *reps > 1 {
            out.push_str(&format!("{}(x{})", count, reps));
        } else {
            out.push_str(&count.to_string());
        }
    }
    out
}

/// Build the full environment for local task `local_id`.
pub fn task_env(desc: &StepDescriptor, local_id: u32) -> Vec<(String, String)> {
    let mut env = desc.env.clone();
    let global_id =
        desc.tasks.get(local_id as usize).map(|t| t.global_id).unwrap_or(local_id);

    set_env(&mut env, "SLURM_JOBID", desc.key.job_id.to_string());
    set_env(&mut env, "SLURM_STEPID", desc.key.step_id.to_string());
    set_env(&mut env, "SLURM_NODEID", desc.node_index.to_string());
    set_env(&mut env, "SLURM_CPUS_ON_NODE", desc.cpus_on_node.to_string());
    set_env(&mut env, "SLURM_PROCID", global_id.to_string());
    set_env(&mut env, "SLURM_NNODES", desc.node_count.to_string());
    set_env(&mut env, "SLURM_NPROCS", desc.total_tasks.to_string());
    set_env(&mut env, "SLURM_NODELIST", desc.node_list.clone());
    set_env(&mut env, "SLURM_TASKS_PER_NODE", tasks_per_node_string(&desc.cpu_groups));
    if let Some(host) = &desc.launch_host {
        set_env(&mut env, "SLURM_LAUNCH_NODE_IPADDR", host.clone());
    }
    if let Some(part) = &desc.partition_id {
        set_env(&mut env, "MPIRUN_PARTITION", part.clone());
    }

    env
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
