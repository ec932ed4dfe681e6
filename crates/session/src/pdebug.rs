// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parallel-debugger cooperation.
//!
//! When the step runs under a parallel debugger, each task calls
//! `PTRACE_TRACEME` before exec so it stops on the exec trap; the session
//! manager then replaces that stop with a plain SIGSTOP and detaches, so
//! the debugger can latch onto a stopped process it does not trace.

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

/// Run in the session manager after forking a traced task: wait for the
/// exec stop, park the task with SIGSTOP, and detach.
pub fn trace_process(pid: Pid) {
    if let Err(e) = waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
        tracing::error!("debug handshake waitpid({}): {}", pid, e.desc());
        return;
    }
    if let Err(e) = kill(pid, Signal::SIGSTOP) {
        tracing::error!("kill({}, SIGSTOP): {}", pid, e.desc());
    }
    if let Err(e) = nix::sys::ptrace::detach(pid, None) {
        tracing::error!("ptrace detach({}): {}", pid, e.desc());
    }
}
