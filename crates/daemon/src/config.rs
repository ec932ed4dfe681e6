// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Loaded once at startup from an optional TOML file plus environment
//! overrides, then passed by reference into every step run. Nothing in
//! the launcher reads configuration through globals.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Immutable daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Name this node reports to the controller and clients.
    pub node_name: String,
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Optional TCP listen address for remote controllers.
    pub listen_addr: Option<std::net::SocketAddr>,
    /// Controller endpoint for step-complete notifications.
    pub controller_addr: Option<std::net::SocketAddr>,
    /// Spool directory for batch scripts.
    pub spool_dir: PathBuf,
    /// Daemon log file; stderr when unset.
    pub log_path: Option<PathBuf>,
    /// Prolog script run before each job step (as root).
    pub prolog: Option<PathBuf>,
    /// Epilog script run after each job step (as root).
    pub epilog: Option<PathBuf>,
    /// Binary re-executed as the session manager. Defaults to the
    /// running daemon itself.
    pub session_helper: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: hostname(),
            socket_path: PathBuf::from("/var/run/stepd.sock"),
            listen_addr: None,
            controller_addr: None,
            spool_dir: PathBuf::from("/var/spool/stepd"),
            log_path: None,
            prolog: None,
            epilog: None,
            session_helper: None,
        }
    }
}

impl Config {
    /// Load from a TOML file; missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, crate::DaemonError> {
        let Some(path) = path else { return Ok(Self::default()) };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::DaemonError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| crate::DaemonError::Config(format!("{}: {}", path.display(), e)))
    }

    /// The binary to re-execute for the session manager.
    pub fn session_helper(&self) -> PathBuf {
        if let Some(helper) = &self.session_helper {
            return helper.clone();
        }
        std::env::current_exe().unwrap_or_else(|_| PathBuf::from("stepd"))
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
