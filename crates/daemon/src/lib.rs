// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! stepd-daemon: the per-node launcher daemon.
//!
//! Listens for launch requests from the controller, builds step
//! descriptors, and runs one job manager per step. The job manager owns
//! the step end to end: stdio routing through the IO engine, the
//! session-manager child, pid and exit collection, client notification,
//! and teardown.

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod listener;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod script;

pub use config::Config;
pub use registry::{StepRegistry, StepState};

/// Daemon-level failures.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(std::path::PathBuf, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}
