// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame header: type, local task id, global task id, payload length.

use crate::ProtocolError;

/// Encoded size of a frame header.
pub const FRAME_HEADER_LEN: usize = 12;

/// Largest payload a single frame may carry. A task line longer than this
/// is split across frames, the first marked as truncated by the router.
pub const MAX_PAYLOAD: usize = 4096;

/// Direction and stream of a frame. Wire values are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameKind {
    /// Task stdout, launcher → client.
    Stdout = 0,
    /// Task stderr, launcher → client.
    Stderr = 1,
    /// Client → one task's stdin, addressed by global task id.
    Stdin = 2,
    /// Client → every task's stdin.
    StdinAll = 3,
}

impl FrameKind {
    pub fn from_wire(value: u16) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(FrameKind::Stdout),
            1 => Ok(FrameKind::Stderr),
            2 => Ok(FrameKind::Stdin),
            3 => Ok(FrameKind::StdinAll),
            other => Err(ProtocolError::UnknownFrameKind(other)),
        }
    }

    /// True for frames flowing from the client toward task stdin.
    pub fn is_input(self) -> bool {
        matches!(self, FrameKind::Stdin | FrameKind::StdinAll)
    }
}

/// Fixed header preceding every payload on a client socket.
///
/// `length == 0` signals EOF for the stream the header names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub local_task: u16,
    pub global_task: u32,
    pub length: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, local_task: u16, global_task: u32, length: u32) -> Self {
        Self { kind, local_task, global_task, length }
    }

    /// An EOF marker for the given stream and task.
    pub fn eof(kind: FrameKind, local_task: u16, global_task: u32) -> Self {
        Self::new(kind, local_task, global_task, 0)
    }

    pub fn is_eof(&self) -> bool {
        self.length == 0
    }

    /// Encode into the fixed wire layout (big-endian throughout).
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..2].copy_from_slice(&(self.kind as u16).to_be_bytes());
        buf[2..4].copy_from_slice(&self.local_task.to_be_bytes());
        buf[4..8].copy_from_slice(&self.global_task.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode from the first [`FRAME_HEADER_LEN`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::Truncated { need: FRAME_HEADER_LEN, got: buf.len() });
        }
        let kind = FrameKind::from_wire(u16::from_be_bytes([buf[0], buf[1]]))?;
        let local_task = u16::from_be_bytes([buf[2], buf[3]]);
        let global_task = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let length = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if length as usize > MAX_PAYLOAD {
            return Err(ProtocolError::Oversize(length));
        }
        Ok(Self { kind, local_task, global_task, length })
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
