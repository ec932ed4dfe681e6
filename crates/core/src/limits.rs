// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource-limit table applied to tasks before exec.

use serde::{Deserialize, Serialize};

/// Resource kinds the launcher propagates to tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Core,
    Cpu,
    Data,
    FileSize,
    NoFile,
    NProc,
    Rss,
    Stack,
}

crate::simple_display! {
    LimitKind {
        Core => "core",
        Cpu => "cpu",
        Data => "data",
        FileSize => "fsize",
        NoFile => "nofile",
        NProc => "nproc",
        Rss => "rss",
        Stack => "stack",
    }
}

/// Soft limits requested by the launching user, carried in the step
/// descriptor and applied by the session manager. `u64::MAX` encodes
/// "unlimited".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    entries: Vec<(LimitKind, u64)>,
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the soft limit for `kind`.
    pub fn set(&mut self, kind: LimitKind, value: u64) {
        if let Some(e) = self.entries.iter_mut().find(|(k, _)| *k == kind) {
            e.1 = value;
        } else {
            self.entries.push((kind, value));
        }
    }

    pub fn get(&self, kind: LimitKind) -> Option<u64> {
        self.entries.iter().find(|(k, _)| *k == kind).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LimitKind, u64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
