// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task stdio pipes.
//!
//! Three pipes per task. The parent-side ends (stdin write, stdout read,
//! stderr read) are nonblocking and feed the reactor; the child-side
//! ends cross into the session manager and end up dup'd onto the task's
//! fds 0/1/2. Every end is close-on-exec in this process: the session
//! manager's spawn hook re-enables inheritance for its own child fds
//! only, so pipes of one step never leak into another step's session.

use std::os::fd::{AsFd, OwnedFd};
use stepd_sys::SysError;

/// The six ends of one task's stdio plumbing.
#[derive(Debug)]
pub struct TaskPipes {
    pub stdin_wr: OwnedFd,
    pub stdout_rd: OwnedFd,
    pub stderr_rd: OwnedFd,
    pub child_stdin: OwnedFd,
    pub child_stdout: OwnedFd,
    pub child_stderr: OwnedFd,
}

impl TaskPipes {
    pub fn create() -> Result<Self, SysError> {
        let (child_stdin, stdin_wr) = stepd_sys::pipe_pair()?;
        let (stdout_rd, child_stdout) = stepd_sys::pipe_pair()?;
        let (stderr_rd, child_stderr) = stepd_sys::pipe_pair()?;

        for fd in [&stdin_wr, &stdout_rd, &stderr_rd] {
            stepd_sys::set_cloexec(fd.as_fd())?;
            stepd_sys::set_nonblocking(fd.as_fd())?;
        }
        for fd in [&child_stdin, &child_stdout, &child_stderr] {
            stepd_sys::set_cloexec(fd.as_fd())?;
        }

        Ok(Self { stdin_wr, stdout_rd, stderr_rd, child_stdin, child_stdout, child_stderr })
    }
}
