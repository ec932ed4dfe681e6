// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task-exec primitive.
//!
//! Each task is a `Command` spawn whose pre-exec hook runs between fork
//! and exec: unblock every signal, join the step's process group, and
//! (under a parallel debugger) request the exec trace stop. Stdio is
//! wired from the task's pipe ends, or from the single client socket in
//! spawn flavor.

use nix::sys::signal::{SigSet, SigmaskHow};
use nix::unistd::Pid;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use stepd_core::StepDescriptor;

/// Where the task's fds 0/1/2 come from.
#[derive(Debug)]
pub enum TaskStdio {
    /// Launcher pipes (interactive and batch flavors).
    Pipes { stdin: OwnedFd, stdout: OwnedFd, stderr: OwnedFd },
    /// One connected client socket shared by all three streams.
    Socket(OwnedFd),
}

/// Fork-and-exec local task `local_id` with the prepared environment.
///
/// `pgrp` is the process group to join: `None` makes the new task the
/// group leader (task 0), so the whole step shares one pgrp rooted at the
/// first task's pid.
pub fn spawn_task(
    desc: &StepDescriptor,
    env: &[(String, String)],
    stdio: TaskStdio,
    pgrp: Option<Pid>,
) -> std::io::Result<Child> {
    let mut cmd = Command::new(&desc.argv[0]);
    cmd.args(&desc.argv[1..]);
    cmd.env_clear();
    for (k, v) in env {
        cmd.env(k, v);
    }

    match stdio {
        TaskStdio::Pipes { stdin, stdout, stderr } => {
            cmd.stdin(Stdio::from(stdin));
            cmd.stdout(Stdio::from(stdout));
            cmd.stderr(Stdio::from(stderr));
        }
        TaskStdio::Socket(sock) => {
            let out = sock.try_clone()?;
            let err = sock.try_clone()?;
            cmd.stdin(Stdio::from(sock));
            cmd.stdout(Stdio::from(out));
            cmd.stderr(Stdio::from(err));
        }
    }

    let group = pgrp.map(Pid::as_raw).unwrap_or(0);
    let debug = desc.parallel_debug;
    // SAFETY: the hook only performs async-signal-safe syscalls.
    unsafe {
        cmd.pre_exec(move || {
            let empty = SigSet::empty();
            nix::sys::signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&empty), None)
                .map_err(std::io::Error::from)?;
            // racy against the group leader's own setpgid; the parent
            // repeats the call after spawn, so a miss here is harmless
            let _ = nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(group));
            if debug {
                nix::sys::ptrace::traceme().map_err(std::io::Error::from)?;
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    // parent-side half of the double setpgid
    let pid = Pid::from_raw(child.id() as i32);
    let _ = nix::unistd::setpgid(pid, pgrp.unwrap_or(pid));
    Ok(child)
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
