// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal-set construction and mask management.
//!
//! The session manager blocks [`SESSION_SIGNALS`] before forking tasks and
//! then drives its reap loop with `sigwait`; each task unblocks everything
//! before exec. The job manager blocks [`MANAGER_SIGNALS`] for its own
//! lifetime.

use crate::SysError;
use nix::sys::signal::{SigHandler, SigSet, SigmaskHow, Signal};

/// Signals blocked in the session manager around the task-fork loop.
pub const SESSION_SIGNALS: &[Signal] = &[
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGCHLD,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGTSTP,
    Signal::SIGXCPU,
    Signal::SIGQUIT,
    Signal::SIGPIPE,
    Signal::SIGALRM,
];

/// Signals blocked in the job manager for the duration of a step.
pub const MANAGER_SIGNALS: &[Signal] = &[
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGTSTP,
    Signal::SIGQUIT,
    Signal::SIGPIPE,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGALRM,
];

/// Build a signal set from a list of signals.
pub fn sigset(signals: &[Signal]) -> SigSet {
    let mut set = SigSet::empty();
    for sig in signals {
        set.add(*sig);
    }
    set
}

/// Block `set` on the current thread, returning the previous mask.
pub fn block(set: &SigSet) -> Result<SigSet, SysError> {
    let mut old = SigSet::empty();
    nix::sys::signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(set), Some(&mut old))
        .map_err(|e| SysError::new("sigmask block", e))?;
    Ok(old)
}

/// Unblock `set` on the current thread.
pub fn unblock(set: &SigSet) -> Result<(), SysError> {
    nix::sys::signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(set), None)
        .map_err(|e| SysError::new("sigmask unblock", e))
}

/// Replace the current thread's mask with the empty set.
pub fn clear_mask() -> Result<(), SysError> {
    restore_mask(&SigSet::empty())
}

/// Snapshot the current thread's mask.
pub fn save_mask() -> Result<SigSet, SysError> {
    SigSet::thread_get_mask().map_err(|e| SysError::new("sigmask get", e))
}

/// Install a previously saved mask.
pub fn restore_mask(set: &SigSet) -> Result<(), SysError> {
    nix::sys::signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(set), None)
        .map_err(|e| SysError::new("sigmask set", e))
}

/// Wait for one of the signals in `set` to become pending.
pub fn wait_signal(set: &SigSet) -> Result<Signal, SysError> {
    set.wait().map_err(|e| SysError::new("sigwait", e))
}

extern "C" fn noop_chld(_signo: nix::libc::c_int) {}

/// Install a no-op SIGCHLD handler.
///
/// Some kernels never mark an ignored-by-default signal pending for a
/// thread that has it blocked; with no handler installed, `sigwait` on
/// SIGCHLD would then hang forever.
pub fn install_noop_sigchld() -> Result<(), SysError> {
    let action = nix::sys::signal::SigAction::new(
        SigHandler::Handler(noop_chld),
        nix::sys::signal::SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler is a no-op and async-signal-safe.
    unsafe {
        nix::sys::signal::sigaction(Signal::SIGCHLD, &action)
            .map_err(|e| SysError::new("sigaction", e))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
