// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Poll loop plumbing for the IO engine.
//!
//! The reactor proper lives in [`crate::step_io`]; this module owns the
//! mechanics: building the poll set from per-object interests, waiting
//! with no timeout, and the wake pipe that pulls the loop out of `poll`
//! when another thread changes state (new client, shutdown, task exit).

use crate::IoEngineError;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;
use stepd_sys::SysError;

/// Opaque handle naming a registered IO object.
pub type Token = u32;

/// What an object currently wants from the poll loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        !self.read && !self.write
    }
}

/// What poll reported for an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl Readiness {
    pub fn any(&self) -> bool {
        self.readable || self.writable || self.error || self.hangup
    }
}

/// Self-pipe used to interrupt a blocked `poll`.
///
/// Any thread holding a [`WakeHandle`] can kick the reactor; the read end
/// sits in every poll set and is drained on wakeup.
pub struct WakePipe {
    rd: OwnedFd,
    wr: Arc<OwnedFd>,
}

/// Cloneable, thread-safe wake trigger.
#[derive(Clone)]
pub struct WakeHandle(Arc<OwnedFd>);

impl WakeHandle {
    /// Interrupt the reactor's poll. Safe to call repeatedly; a full pipe
    /// means a wakeup is already pending.
    pub fn kick(&self) {
        match nix::unistd::write(self.0.as_fd(), &[1u8]) {
            Ok(_) | Err(Errno::EAGAIN) | Err(Errno::EPIPE) => {}
            Err(e) => tracing::warn!("wake pipe write: {}", e),
        }
    }
}

impl WakePipe {
    pub fn new() -> Result<Self, SysError> {
        let (rd, wr) = stepd_sys::pipe_pair()?;
        stepd_sys::set_nonblocking(rd.as_fd())?;
        stepd_sys::set_nonblocking(wr.as_fd())?;
        stepd_sys::set_cloexec(rd.as_fd())?;
        stepd_sys::set_cloexec(wr.as_fd())?;
        Ok(Self { rd, wr: Arc::new(wr) })
    }

    pub fn handle(&self) -> WakeHandle {
        WakeHandle(Arc::clone(&self.wr))
    }

    /// Consume pending wakeups.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match nix::unistd::read(self.rd.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }

    fn fd(&self) -> BorrowedFd<'_> {
        self.rd.as_fd()
    }
}

/// One poll pass over the registered objects.
///
/// Blocks until at least one object (or the wake pipe) is ready. Entries
/// with no interest are excluded from the poll set entirely, matching the
/// predicate-driven registration model. Returns the ready objects in
/// registration order; the wake pipe is drained internally.
pub fn poll_objects(
    entries: &[(Token, RawFd, Interest)],
    wake: &WakePipe,
) -> Result<Vec<(Token, Readiness)>, IoEngineError> {
    let mut fds = Vec::with_capacity(entries.len() + 1);
    fds.push(PollFd::new(wake.fd(), PollFlags::POLLIN));

    let mut tokens = Vec::with_capacity(entries.len());
    for (token, raw, interest) in entries {
        if interest.is_none() {
            continue;
        }
        let mut flags = PollFlags::empty();
        if interest.read {
            flags |= PollFlags::POLLIN;
        }
        if interest.write {
            flags |= PollFlags::POLLOUT;
        }
        // SAFETY: the caller owns these fds and keeps them open for the
        // duration of the call.
        let borrowed = unsafe { stepd_sys::fd::borrow_raw(*raw) };
        fds.push(PollFd::new(borrowed, flags));
        tokens.push(*token);
    }

    loop {
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(IoEngineError::Sys(SysError::new("poll", e))),
        }
    }

    let mut ready = Vec::new();
    if fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
        wake.drain();
    }
    for (i, token) in tokens.iter().enumerate() {
        let Some(revents) = fds[i + 1].revents() else { continue };
        let readiness = Readiness {
            readable: revents.contains(PollFlags::POLLIN),
            writable: revents.contains(PollFlags::POLLOUT),
            error: revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL),
            hangup: revents.contains(PollFlags::POLLHUP),
        };
        if readiness.any() {
            ready.push((*token, readiness));
        }
    }
    Ok(ready)
}

#[cfg(test)]
#[path = "reactor_tests.rs"]
mod tests;
