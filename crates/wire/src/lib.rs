// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! stepd-wire: bit-exact codecs for task traffic.
//!
//! Three wire shapes live here:
//! - the 12-byte frame header carried before every payload on a client
//!   socket (all integer fields big-endian),
//! - the 132-byte session header a client receives once at attach time
//!   (128-byte authentication signature + big-endian node index),
//! - the fixed-size pid and exit records the session manager writes to
//!   the job manager over the control pipe (native byte order; the pipe
//!   never leaves the node).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod control;
mod frame;
mod session;

pub use control::{ExitRecord, PidRecord, EXIT_RECORD_LEN, PID_RECORD_LEN};
pub use frame::{FrameHeader, FrameKind, FRAME_HEADER_LEN, MAX_PAYLOAD};
pub use session::{SessionHeader, SESSION_HEADER_LEN, SIGNATURE_LEN};

/// Wire-format violations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown frame type {0}")]
    UnknownFrameKind(u16),
    #[error("short buffer: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("frame payload length {0} exceeds maximum")]
    Oversize(u32),
    #[error("session header signature mismatch")]
    BadSignature,
    #[error("auth key must be {expected} bytes, got {got}")]
    BadKeyLength { expected: usize, got: usize },
}
