// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target user identity for a step.

use serde::{Deserialize, Serialize};

/// The uid/gid the step's tasks run as, resolved by the launch dispatcher
/// while still privileged so the session manager never needs the passwd
/// database after demotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub uid: u32,
    pub gid: u32,
    pub user_name: String,
    /// Supplementary groups, primary group included.
    pub groups: Vec<u32>,
}

impl UserIdentity {
    pub fn new(uid: u32, gid: u32, user_name: impl Into<String>) -> Self {
        Self { uid, gid, user_name: user_name.into(), groups: vec![gid] }
    }

    pub fn with_groups(mut self, groups: Vec<u32>) -> Self {
        self.groups = groups;
        self
    }
}
