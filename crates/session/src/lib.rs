// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! stepd-session: the user-side half of the launcher.
//!
//! The session manager is a re-exec of the daemon binary running as the
//! target user. It owns the POSIX session, forks the step's tasks, reaps
//! them, and reports pids and exit statuses to the job manager over the
//! control pipe inherited on fd 3. The parent-side spawn helper and the
//! interconnect plugin seam live here too, so the daemon and the child
//! share one contract.

pub mod interconnect;
pub mod limits;
pub mod manager;
pub mod pdebug;
pub mod spawn;
pub mod task;

pub use interconnect::{AttachCtx, Interconnect, InterconnectError, NullInterconnect};
pub use manager::{run_session, session_main};
pub use spawn::{spawn_session_manager, SessionHandle, CONTROL_FD};

/// Errors raised while creating the session-manager child.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not serialize step descriptor: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not spawn session manager: {0}")]
    Spawn(#[from] std::io::Error),
    #[error(transparent)]
    Sys(#[from] stepd_sys::SysError),
}
