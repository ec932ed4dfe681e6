// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed IO objects registered with the reactor.
//!
//! One sum type with match dispatch instead of per-type ops tables. Each
//! variant keeps its own queues, buffer, and coalesced error state; the
//! readable/writable predicates drive poll-set membership.

use crate::buffer::{BoundedBuffer, Overwrite};
use crate::error_state::ErrorState;
use crate::frames::Frame;
use crate::reactor::Interest;
use std::collections::VecDeque;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use stepd_wire::{FrameHeader, FrameKind, FRAME_HEADER_LEN, MAX_PAYLOAD};

/// Outgoing side of an object: queued frames plus the one in flight.
#[derive(Debug, Default)]
pub struct OutQueue {
    pub queue: VecDeque<Rc<Frame>>,
    pub cur: Option<Rc<Frame>>,
    /// Bytes of `cur` not yet written.
    pub remaining: usize,
}

impl OutQueue {
    pub fn enqueue(&mut self, frame: Rc<Frame>) {
        self.queue.push_back(frame);
    }

    pub fn has_pending(&self) -> bool {
        self.cur.is_some() || !self.queue.is_empty()
    }

    /// Frames still held (for teardown accounting).
    pub fn drain(&mut self) -> Vec<Rc<Frame>> {
        let mut held: Vec<_> = self.queue.drain(..).collect();
        if let Some(cur) = self.cur.take() {
            held.push(cur);
        }
        self.remaining = 0;
        held
    }
}

/// Write side of one task's stdin pipe.
#[derive(Debug)]
pub struct TaskStdin {
    pub local_id: u16,
    pub global_id: u32,
    /// Dropped (closed) when the EOF message is consumed.
    pub fd: Option<OwnedFd>,
    pub out: OutQueue,
    pub err: ErrorState,
}

impl TaskStdin {
    pub fn new(local_id: u16, global_id: u32, fd: OwnedFd) -> Self {
        Self { local_id, global_id, fd: Some(fd), out: OutQueue::default(), err: ErrorState::new() }
    }

    pub fn label(&self) -> String {
        format!("task {} stdin", self.global_id)
    }
}

/// Read side of one task's stdout or stderr pipe, with its line buffer.
///
/// The buffer doubles as the pre-attach sink: output accumulates here
/// while no client is connected, and a late client is served a short
/// replay of recent complete lines out of the retained region.
#[derive(Debug)]
pub struct TaskOut {
    pub kind: FrameKind,
    pub local_id: u16,
    pub global_id: u32,
    pub fd: Option<OwnedFd>,
    pub buf: BoundedBuffer,
    pub eof: bool,
    pub eof_sent: bool,
    pub err: ErrorState,
}

impl TaskOut {
    pub fn new(kind: FrameKind, local_id: u16, global_id: u32, fd: OwnedFd) -> Self {
        Self {
            kind,
            local_id,
            global_id,
            fd: Some(fd),
            buf: BoundedBuffer::new(MAX_PAYLOAD, MAX_PAYLOAD * 16, Overwrite::WrapOnce),
            eof: false,
            eof_sent: false,
            err: ErrorState::new(),
        }
    }

    pub fn label(&self) -> String {
        let stream = if self.kind == FrameKind::Stdout { "stdout" } else { "stderr" };
        format!("task {} {}", self.global_id, stream)
    }
}

/// Incoming side of a client socket: a frame header possibly split across
/// reads, then a payload streamed into a pool frame.
#[derive(Debug, Default)]
pub struct ClientIn {
    pub hdr_buf: [u8; FRAME_HEADER_LEN],
    pub hdr_got: usize,
    pub body: Option<(Frame, usize)>,
    pub eof: bool,
}

/// A connected remote client carrying framed traffic both ways.
#[derive(Debug)]
pub struct Client {
    pub fd: OwnedFd,
    pub incoming: ClientIn,
    pub out: OutQueue,
    pub err: ErrorState,
}

impl Client {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd, incoming: ClientIn::default(), out: OutQueue::default(), err: ErrorState::new() }
    }

    pub fn label(&self) -> String {
        "client socket".to_string()
    }
}

/// Local file capturing one stream (a per-stream path override).
///
/// Payload bytes are staged in a no-overwrite buffer and drained to the
/// file as it accepts writes; refusals are accounted, never blocking the
/// task path.
#[derive(Debug)]
pub struct FileSink {
    pub fd: OwnedFd,
    pub kind: FrameKind,
    /// Capture only this global task; `None` captures every task.
    pub task: Option<u32>,
    pub buf: BoundedBuffer,
    pub refused: u64,
    pub err: ErrorState,
}

impl FileSink {
    pub fn new(fd: OwnedFd, kind: FrameKind, task: Option<u32>) -> Self {
        Self {
            fd,
            kind,
            task,
            buf: BoundedBuffer::new(MAX_PAYLOAD, MAX_PAYLOAD * 16, Overwrite::Never).with_replay(0),
            refused: 0,
            err: ErrorState::new(),
        }
    }

    pub fn wants(&self, kind: FrameKind, global_id: u32) -> bool {
        self.kind == kind && self.task.map_or(true, |t| t == global_id)
    }

    pub fn label(&self) -> String {
        "file sink".to_string()
    }
}

/// Local file feeding task stdin (a stdin path override). Reads are pool
/// bound like a client's; EOF closes the target stdin.
#[derive(Debug)]
pub struct FileSource {
    pub fd: OwnedFd,
    /// Target global task; `None` broadcasts to every task.
    pub target: Option<u32>,
    pub eof_sent: bool,
    pub err: ErrorState,
}

impl FileSource {
    pub fn new(fd: OwnedFd, target: Option<u32>) -> Self {
        Self { fd, target, eof_sent: false, err: ErrorState::new() }
    }

    /// Header for a chunk of `len` bytes read from the file.
    pub fn header(&self, len: u32) -> FrameHeader {
        match self.target {
            Some(gid) => FrameHeader::new(FrameKind::Stdin, 0, gid, len),
            None => FrameHeader::new(FrameKind::StdinAll, 0, 0, len),
        }
    }

    pub fn label(&self) -> String {
        "stdin file".to_string()
    }
}

/// Every object the reactor can own.
#[derive(Debug)]
pub enum IoObj {
    TaskIn(TaskStdin),
    TaskOut(TaskOut),
    Client(Client),
    FileSink(FileSink),
    FileSource(FileSource),
}

impl IoObj {
    /// The fd to poll, when the object still has one.
    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            IoObj::TaskIn(t) => t.fd.as_ref().map(|f| f.as_raw_fd()),
            IoObj::TaskOut(t) => t.fd.as_ref().map(|f| f.as_raw_fd()),
            IoObj::Client(c) => Some(c.fd.as_raw_fd()),
            IoObj::FileSink(s) => Some(s.fd.as_raw_fd()),
            IoObj::FileSource(s) => Some(s.fd.as_raw_fd()),
        }
    }

    /// Poll interest given the current free-list state.
    pub fn interest(&self, pool_has_free: bool) -> Interest {
        match self {
            IoObj::TaskIn(t) => {
                Interest { read: false, write: t.fd.is_some() && t.out.has_pending() }
            }
            IoObj::TaskOut(t) => Interest {
                read: t.fd.is_some() && !t.eof && t.buf.free() > 0,
                write: false,
            },
            IoObj::Client(c) => Interest {
                read: !c.incoming.eof && (c.incoming.body.is_some() || pool_has_free),
                write: c.out.has_pending(),
            },
            IoObj::FileSink(s) => Interest { read: false, write: !s.buf.is_empty() },
            IoObj::FileSource(s) => {
                Interest { read: !s.eof_sent && pool_has_free, write: false }
            }
        }
    }
}

#[cfg(test)]
#[path = "objects_tests.rs"]
mod tests;
