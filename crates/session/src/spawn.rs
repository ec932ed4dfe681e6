// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parent-side creation of the session-manager child.
//!
//! The job manager re-executes the daemon binary with the
//! `session-manager` subcommand instead of forking: the serialized step
//! descriptor goes in over the child's stdin and the control-pipe write
//! end is pinned to fd [`CONTROL_FD`]. Task pipe child ends are inherited
//! by number; the descriptor lists them.

use crate::SessionError;
use std::io::Write;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use stepd_core::StepDescriptor;

/// Fd number the session manager finds the control-pipe write end on.
pub const CONTROL_FD: RawFd = 3;

/// A running session manager plus the read end of its control pipe.
#[derive(Debug)]
pub struct SessionHandle {
    pub child: Child,
    pub control_rd: OwnedFd,
}

impl SessionHandle {
    pub fn pid(&self) -> i32 {
        self.child.id() as i32
    }
}

/// Spawn the session manager for `desc`.
///
/// `helper` is the binary to re-execute (normally the daemon itself).
/// The task pipe child ends named in the descriptor are close-on-exec in
/// the parent; the spawn hook re-enables inheritance for exactly this
/// child, so concurrent steps never see each other's pipes.
pub fn spawn_session_manager(
    desc: &StepDescriptor,
    helper: &Path,
) -> Result<SessionHandle, SessionError> {
    let payload = serde_json::to_vec(desc)?;

    let (control_rd, control_wr) = stepd_sys::pipe_pair()?;
    stepd_sys::set_cloexec(control_rd.as_fd())?;
    stepd_sys::set_cloexec(control_wr.as_fd())?;

    let mut cmd = Command::new(helper);
    cmd.arg("session-manager");
    cmd.stdin(Stdio::piped());

    let mut inherit: Vec<RawFd> = Vec::with_capacity(desc.tasks.len() * 3);
    for task in &desc.tasks {
        for fd in [task.child_stdin, task.child_stdout, task.child_stderr] {
            if let Some(fd) = fd {
                inherit.push(fd);
            }
        }
    }

    let control_raw = control_wr.as_raw_fd();
    let hook = move || {
        if control_raw == CONTROL_FD {
            // SAFETY: the write end is held open by the parent until
            // after spawn returns.
            let fd = unsafe { stepd_sys::fd::borrow_raw(CONTROL_FD) };
            stepd_sys::clear_cloexec(fd).map_err(|e| std::io::Error::from(e.errno))?;
        } else {
            // dup2 clears close-on-exec on the new descriptor
            stepd_sys::fd::dup_to(control_raw, CONTROL_FD)
                .map_err(|e| std::io::Error::from(e.errno))?;
        }
        for raw in &inherit {
            // SAFETY: the job manager holds these open until after spawn
            // returns.
            let fd = unsafe { stepd_sys::fd::borrow_raw(*raw) };
            stepd_sys::clear_cloexec(fd).map_err(|e| std::io::Error::from(e.errno))?;
        }
        Ok(())
    };
    // SAFETY: the hook only calls dup2/fcntl, both async-signal-safe.
    unsafe {
        cmd.pre_exec(hook);
    }

    let mut child = cmd.spawn()?;
    drop(control_wr);

    if let Some(mut stdin) = child.stdin.take() {
        // dropping stdin afterwards delivers EOF so the child can parse.
        // A child that died already shows up as BrokenPipe here; let the
        // wait path report that instead.
        match stdin.write_all(&payload) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::warn!(step = %desc.key, "session manager closed stdin early");
            }
            Err(e) => return Err(SessionError::Spawn(e)),
        }
    }

    tracing::debug!(step = %desc.key, pid = child.id(), "session manager created");

    Ok(SessionHandle { child, control_rd })
}
