// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! stepd-core: data model for the node-level job-step launcher.
//!
//! A *step* is one invocation of a parallel program on this node; it owns
//! N task processes. This crate holds the step descriptor handed from the
//! launch dispatcher to the job manager and the session manager, the
//! per-task specifications, user identity and resource limits, canonical
//! task environment construction, and the session-manager exit-code
//! contract. Everything here is plain data, no syscalls.

pub mod macros;

pub mod env;
pub mod exit;
pub mod limits;
pub mod step;
pub mod user;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use env::{task_env, tasks_per_node_string};
pub use exit::{session_exit, StepResult, WaitCode};
pub use limits::{LimitKind, ResourceLimits};
pub use step::{ClientEndpoint, StepDescriptor, StepFlavor, StepKey, TaskSpec, AUTH_SIG_LEN};
pub use user::UserIdentity;
