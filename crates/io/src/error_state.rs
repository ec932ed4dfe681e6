// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-object error coalescing.
//!
//! A wedged fd can fail on every poll iteration; logging each failure
//! would bury the daemon log. Identical consecutive errors collapse into
//! one line per change, per 5-second window, or per 65 000 repeats.

use nix::errno::Errno;
use std::time::{Duration, Instant};

/// Failure site on an IO object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    None,
    Write,
    Read,
    Poll,
}

stepd_core::simple_display! {
    ErrorKind {
        None => "",
        Write => "write failed",
        Read => "read failed",
        Poll => "poll error",
    }
}

const EMIT_WINDOW: Duration = Duration::from_secs(5);
const EMIT_REPEATS: u32 = 65_000;

/// Coalesced error state for one IO object.
#[derive(Debug)]
pub struct ErrorState {
    kind: ErrorKind,
    last: Option<Errno>,
    count: u32,
    since: Instant,
}

impl Default for ErrorState {
    fn default() -> Self {
        Self { kind: ErrorKind::None, last: None, count: 0, since: Instant::now() }
    }
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error; emit a log line when the coalescing policy says so.
    ///
    /// `what` names the object (e.g. "task 3 stdout").
    pub fn update(&mut self, kind: ErrorKind, errno: Errno, what: &str) {
        if self.kind == kind && self.last == Some(errno) {
            self.count += 1;
            if self.since.elapsed() < EMIT_WINDOW && self.count < EMIT_REPEATS {
                return;
            }
        } else {
            self.kind = kind;
            self.last = Some(errno);
            self.count = 0;
            self.since = Instant::now();
        }

        if self.count == 0 {
            tracing::error!("{}: {}: {}", kind, what, errno.desc());
        } else {
            tracing::error!("{}: {}: {} (repeated {} times)", kind, what, errno.desc(), self.count);
        }

        if self.count > 0 {
            self.count = 0;
            self.since = Instant::now();
        }
    }

    /// Number of repeats accumulated since the last emitted line.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> u32 {
        self.count
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_emits_and_resets_count() {
        let mut st = ErrorState::new();
        st.update(ErrorKind::Read, Errno::EIO, "task 0 stdout");
        assert_eq!(st.pending(), 0);
        assert_eq!(st.kind(), ErrorKind::Read);
    }

    #[test]
    fn identical_errors_coalesce_within_window() {
        let mut st = ErrorState::new();
        st.update(ErrorKind::Write, Errno::EPIPE, "client");
        st.update(ErrorKind::Write, Errno::EPIPE, "client");
        st.update(ErrorKind::Write, Errno::EPIPE, "client");
        assert_eq!(st.pending(), 2);
    }

    #[test]
    fn a_different_errno_restarts_the_state() {
        let mut st = ErrorState::new();
        st.update(ErrorKind::Write, Errno::EPIPE, "client");
        st.update(ErrorKind::Write, Errno::EPIPE, "client");
        st.update(ErrorKind::Write, Errno::EIO, "client");
        assert_eq!(st.pending(), 0);
    }
}
