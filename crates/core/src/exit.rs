// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-manager exit contract and wait-status decoding.
//!
//! The session manager reports launch-phase failures through a fixed table
//! of exit codes; the job manager maps those onto step-level results. Any
//! exit code above the table is the raw exit status of a single task
//! (batch flavor runs the script as the only task).

use serde::{Deserialize, Serialize};

/// Exit codes the session manager uses for its own failures.
///
/// Keep in sync with the mapping in [`StepResult::from_session_exit`].
pub mod session_exit {
    pub const SUCCESS: i32 = 0;
    pub const INTERCONNECT: i32 = 1;
    pub const UID_GID: i32 = 2;
    pub const SETSID: i32 = 3;
    pub const CHDIR: i32 = 4;
    pub const RESERVED: i32 = 5;
    pub const EXEC: i32 = 6;
    pub const MAX: i32 = 6;
}

/// Step-level result reported to the controller and to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Success,
    InterconnectFailure,
    UidGidError,
    SetsidError,
    ChdirError,
    ExecFailed,
    /// The session manager was killed before reaping every task.
    SessionManagerKilled,
    /// A step with the same (job id, step id) already exists on this node.
    StepExists,
    /// The step registry is full.
    TooManySteps,
    /// Stdio routing could not be established.
    IoSetup,
    /// Raw exit status from a single task (batch) or an unmapped code.
    Raw(i32),
}

crate::simple_display! {
    StepResult {
        Success => "success",
        InterconnectFailure => "interconnect failure",
        UidGidError => "uid/gid error",
        SetsidError => "setsid error",
        ChdirError => "chdir error",
        ExecFailed => "exec failed",
        SessionManagerKilled => "session manager killed",
        StepExists => "step exists",
        TooManySteps => "too many steps",
        IoSetup => "io setup failed",
        Raw(..) => "task exit status",
    }
}

impl StepResult {
    /// Map a session-manager exit code onto a step result.
    pub fn from_session_exit(code: i32) -> Self {
        match code {
            session_exit::SUCCESS => StepResult::Success,
            session_exit::INTERCONNECT => StepResult::InterconnectFailure,
            session_exit::UID_GID => StepResult::UidGidError,
            session_exit::SETSID => StepResult::SetsidError,
            session_exit::CHDIR => StepResult::ChdirError,
            session_exit::EXEC => StepResult::ExecFailed,
            other => StepResult::Raw(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Success | StepResult::Raw(0))
    }

    /// Numeric code carried in controller and client messages.
    pub fn code(&self) -> i32 {
        match self {
            StepResult::Success => 0,
            StepResult::InterconnectFailure => 1,
            StepResult::UidGidError => 2,
            StepResult::SetsidError => 3,
            StepResult::ChdirError => 4,
            StepResult::ExecFailed => 6,
            StepResult::SessionManagerKilled => 7,
            StepResult::StepExists => 8,
            StepResult::TooManySteps => 9,
            StepResult::IoSetup => 10,
            StepResult::Raw(status) => *status,
        }
    }
}

/// Decoded `wait`-style status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCode {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal.
    Signaled(i32),
    /// Stopped (traced or job control); the task has not exited.
    Stopped(i32),
}

impl WaitCode {
    /// Decode a raw status word as returned by `waitpid`.
    pub fn from_raw(status: i32) -> Self {
        if status & 0x7f == 0 {
            WaitCode::Exited((status >> 8) & 0xff)
        } else if status & 0xff == 0x7f {
            WaitCode::Stopped((status >> 8) & 0xff)
        } else {
            WaitCode::Signaled(status & 0x7f)
        }
    }

    /// Encode a normal exit as a raw status word.
    pub fn raw_exit(code: i32) -> i32 {
        (code & 0xff) << 8
    }

    /// Encode a signal death as a raw status word.
    pub fn raw_signal(signo: i32) -> i32 {
        signo & 0x7f
    }
}

#[cfg(test)]
#[path = "exit_tests.rs"]
mod tests;
