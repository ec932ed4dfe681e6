// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prolog/epilog script execution.
//!
//! Site scripts run as root around each job with a minimal environment.
//! A missing or non-executable script is skipped, not an error.

use nix::unistd::AccessFlags;
use std::path::Path;
use std::process::Command;

/// Run a prolog or epilog script and return its exit code.
pub fn run_script(
    name: &str,
    path: &Path,
    job_id: u32,
    uid: u32,
    partition: Option<&str>,
) -> std::io::Result<i32> {
    if nix::unistd::access(path, AccessFlags::R_OK | AccessFlags::X_OK).is_err() {
        tracing::debug!("not running {} [{}]", name, path.display());
        return Ok(0);
    }
    tracing::debug!(job_id, "attempting to run {} [{}]", name, path.display());

    let mut cmd = Command::new(path);
    cmd.env_clear();
    cmd.env("SLURM_JOBID", job_id.to_string());
    cmd.env("SLURM_UID", uid.to_string());
    if let Some(part) = partition {
        cmd.env("MPIRUN_PARTITION", part);
    }

    let status = cmd.status()?;
    Ok(status.code().unwrap_or(-1))
}
