// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch-step spool handling.
//!
//! A batch launch persists the submitted script as
//! `<spool>/job<5-digit-jobid>/script`, mode 0500 owned by the target
//! user, and execs that file as the step's only task. The spool entry is
//! removed after the run; removal failure is logged, never fatal.

use nix::unistd::{Gid, Uid};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// On-disk spool entry for one batch job.
#[derive(Debug, Clone)]
pub struct BatchSpool {
    pub dir: PathBuf,
    pub script: PathBuf,
}

/// Create the spool directory and script file for a batch job.
pub fn create_spool(
    spool_dir: &Path,
    job_id: u32,
    script_body: &str,
    uid: u32,
    gid: u32,
) -> std::io::Result<BatchSpool> {
    std::fs::create_dir_all(spool_dir)?;

    let dir = spool_dir.join(format!("job{:05}", job_id));
    match std::fs::create_dir(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }
    // group access for the target user's primary group only
    if let Err(e) = nix::unistd::chown(&dir, None, Some(Gid::from_raw(gid))) {
        tracing::warn!("chown({}): {}", dir.display(), e.desc());
    }
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o750))?;

    let script = dir.join("script");
    let mut file = match std::fs::OpenOptions::new().write(true).create_new(true).open(&script) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            std::fs::remove_file(&script)?;
            std::fs::OpenOptions::new().write(true).create_new(true).open(&script)?
        }
        Err(e) => return Err(e),
    };
    file.write_all(script_body.as_bytes())?;
    drop(file);

    if let Err(e) = nix::unistd::chown(&script, Some(Uid::from_raw(uid)), None) {
        tracing::warn!("chown({}): {}", script.display(), e.desc());
    }
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o500))?;

    Ok(BatchSpool { dir, script })
}

/// Remove the spool entry; failures are logged and swallowed.
pub fn remove_spool(spool: &BatchSpool) {
    if let Err(e) = std::fs::remove_file(&spool.script) {
        tracing::error!("unlink({}): {}", spool.script.display(), e);
    }
    if let Err(e) = std::fs::remove_dir(&spool.dir) {
        tracing::error!("rmdir({}): {}", spool.dir.display(), e);
    }
}
