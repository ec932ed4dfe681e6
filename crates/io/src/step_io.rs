// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-step IO router: task output fan-out, client input fan-in.
//!
//! Owns every IO object, the frame free list, and the wake pipe, and runs
//! the single-threaded reactor loop. All handlers complete promptly; an
//! operation that would block registers interest and returns, so the only
//! suspension point is `poll`.

use crate::error_state::ErrorKind;
use crate::frames::{Frame, FramePool};
use crate::objects::{Client, FileSink, FileSource, IoObj, TaskOut, TaskStdin};
use crate::reactor::{poll_objects, Interest, Readiness, Token, WakeHandle, WakePipe};
use crate::IoEngineError;
use nix::errno::Errno;
use std::collections::BTreeMap;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::rc::Rc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use stepd_wire::{FrameHeader, FrameKind, MAX_PAYLOAD};

/// Frames on the free list per step.
pub const POOL_FRAMES: usize = 64;

/// Replay budget (bytes of complete lines) served to a late client.
pub const REPLAY_BYTES: usize = 256;

/// Parent-side pipe ends for one task, as handed to the engine.
#[derive(Debug)]
pub struct TaskIoFds {
    pub local_id: u16,
    pub global_id: u32,
    pub stdin_wr: OwnedFd,
    pub stdout_rd: OwnedFd,
    pub stderr_rd: OwnedFd,
}

/// Commands another thread may send a running engine.
#[derive(Debug)]
pub enum IoCommand {
    /// Attach a connected, header-exchanged client socket.
    AddClient { fd: OwnedFd, replay: bool },
    /// Capture a stream into a local file.
    AddFileSink { fd: OwnedFd, kind: FrameKind, task: Option<u32> },
    /// Feed task stdin from a local file (`None` broadcasts).
    AddFileSource { fd: OwnedFd, target: Option<u32> },
    /// Tasks are done: stop reading client input, flush, and exit.
    Shutdown,
}

/// Totals reported when the engine finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoSummary {
    /// Task output bytes dropped by wrap-once buffers.
    pub dropped_bytes: u64,
    /// Bytes refused by file sinks that could not keep up.
    pub refused_bytes: u64,
}

enum BodyRead {
    More,
    Wait,
    Eof,
    Failed(Errno),
}

/// The engine. Owns the reactor state for one step.
pub struct StepIo {
    objs: BTreeMap<Token, IoObj>,
    next_token: Token,
    pool: FramePool,
    wake: WakePipe,
    cmds: Receiver<IoCommand>,
    shutdown: bool,
    summary: IoSummary,
}

impl StepIo {
    /// Build the engine over the step's task pipes.
    ///
    /// The engine is not `Send` once frames start circulating, so callers
    /// running it on a dedicated thread construct it there (see
    /// [`crate::thread::IoThread`]) from parts created on the spawning
    /// side.
    pub fn new(tasks: Vec<TaskIoFds>, wake: WakePipe, cmds: Receiver<IoCommand>) -> Self {
        let mut engine = Self {
            objs: BTreeMap::new(),
            next_token: 0,
            pool: FramePool::new(POOL_FRAMES),
            wake,
            cmds,
            shutdown: false,
            summary: IoSummary::default(),
        };

        for t in tasks {
            engine.insert(IoObj::TaskIn(TaskStdin::new(t.local_id, t.global_id, t.stdin_wr)));
            engine.insert(IoObj::TaskOut(TaskOut::new(
                FrameKind::Stdout,
                t.local_id,
                t.global_id,
                t.stdout_rd,
            )));
            engine.insert(IoObj::TaskOut(TaskOut::new(
                FrameKind::Stderr,
                t.local_id,
                t.global_id,
                t.stderr_rd,
            )));
        }

        engine
    }

    /// Single-threaded convenience constructor: engine plus its wake
    /// handle and command sender.
    pub fn build(
        tasks: Vec<TaskIoFds>,
    ) -> Result<(Self, WakeHandle, Sender<IoCommand>), IoEngineError> {
        let wake = WakePipe::new()?;
        let handle = wake.handle();
        let (tx, rx) = std::sync::mpsc::channel();
        Ok((Self::new(tasks, wake, rx), handle, tx))
    }

    fn insert(&mut self, obj: IoObj) -> Token {
        let token = self.next_token;
        self.next_token += 1;
        self.objs.insert(token, obj);
        token
    }

    /// Run until the step completes: shutdown requested, every task
    /// stream has delivered its EOF, and nothing remains queued.
    pub fn run(&mut self) -> Result<IoSummary, IoEngineError> {
        tracing::debug!("io engine started");
        loop {
            self.drain_commands();
            self.route_all();
            if self.finished() {
                break;
            }

            let entries: Vec<(Token, std::os::fd::RawFd, Interest)> = self
                .objs
                .iter()
                .filter_map(|(token, obj)| {
                    let raw = obj.raw_fd()?;
                    Some((*token, raw, obj.interest(self.pool.has_free())))
                })
                .collect();

            let ready = poll_objects(&entries, &self.wake)?;
            for (token, readiness) in ready {
                self.dispatch(token, readiness);
            }
        }
        self.teardown();
        tracing::debug!(
            dropped = self.summary.dropped_bytes,
            refused = self.summary.refused_bytes,
            "io engine finished"
        );
        Ok(self.summary)
    }

    /// Number of registered objects (drained to zero by teardown).
    pub fn object_count(&self) -> usize {
        self.objs.len()
    }

    fn drain_commands(&mut self) {
        loop {
            match self.cmds.try_recv() {
                Ok(IoCommand::AddClient { fd, replay }) => self.add_client(fd, replay),
                Ok(IoCommand::AddFileSink { fd, kind, task }) => {
                    self.insert(IoObj::FileSink(FileSink::new(fd, kind, task)));
                }
                Ok(IoCommand::AddFileSource { fd, target }) => {
                    self.insert(IoObj::FileSource(FileSource::new(fd, target)));
                }
                Ok(IoCommand::Shutdown) => {
                    self.shutdown = true;
                    for obj in self.objs.values_mut() {
                        if let IoObj::Client(c) = obj {
                            c.incoming.eof = true;
                            if let Some((frame, _)) = c.incoming.body.take() {
                                self.pool.put(frame);
                            }
                        }
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn add_client(&mut self, fd: OwnedFd, replay: bool) {
        if stepd_sys::set_nonblocking(fd.as_fd()).is_err() {
            tracing::warn!("could not set client socket nonblocking, dropping it");
            return;
        }
        let _ = stepd_sys::set_cloexec(fd.as_fd());
        let client_token = self.insert(IoObj::Client(Client::new(fd)));

        // Serve recent context and any already-final streams to the late
        // arrival so it observes the same EOF protocol as an early one.
        let outs: Vec<Token> = self
            .objs
            .iter()
            .filter(|(_, o)| matches!(o, IoObj::TaskOut(_)))
            .map(|(t, _)| *t)
            .collect();
        for token in outs {
            let (replayed, eof_frame) = self.replay_frames(token, replay);
            if let Some(IoObj::Client(c)) = self.objs.get_mut(&client_token) {
                for f in replayed {
                    c.out.enqueue(f);
                }
                if let Some(f) = eof_frame {
                    c.out.enqueue(f);
                }
            }
        }
        tracing::debug!("client attached, {} objects registered", self.objs.len());
    }

    /// Build the replay + EOF frames a newly attached client should see
    /// for one task stream.
    fn replay_frames(&mut self, token: Token, replay: bool) -> (Vec<Rc<Frame>>, Option<Rc<Frame>>) {
        let mut scratch = [0u8; REPLAY_BYTES];
        let (kind, local, global, eof_sent, n) = {
            let Some(IoObj::TaskOut(out)) = self.objs.get(&token) else {
                return (Vec::new(), None);
            };
            let n = if replay { out.buf.replay_line(&mut scratch, usize::MAX) } else { 0 };
            (out.kind, out.local_id, out.global_id, out.eof_sent, n)
        };

        let mut frames = Vec::new();
        if n > 0 {
            if let Some(mut frame) = self.pool.take() {
                frame.fill(FrameHeader::new(kind, local, global, n as u32), &scratch[..n]);
                frames.push(Rc::new(frame));
            }
        }
        let eof_frame = if eof_sent {
            self.pool.take().map(|mut frame| {
                frame.fill(FrameHeader::eof(kind, local, global), b"");
                Rc::new(frame)
            })
        } else {
            None
        };
        (frames, eof_frame)
    }

    /// Pack buffered task output into frames and fan them out. Runs every
    /// loop iteration; progress is bounded by the free list.
    fn route_all(&mut self) {
        let outs: Vec<Token> = self
            .objs
            .iter()
            .filter(|(_, o)| matches!(o, IoObj::TaskOut(_)))
            .map(|(t, _)| *t)
            .collect();
        for token in outs {
            self.route_task_out(token);
        }
    }

    fn route_task_out(&mut self, token: Token) {
        let Some(mut obj) = self.objs.remove(&token) else { return };
        if let IoObj::TaskOut(out) = &mut obj {
            while self.pool.has_free() && !out.buf.is_empty() {
                let Some(frame) = Self::build_message(&mut self.pool, out) else { break };
                let (kind, global) = (out.kind, out.global_id);
                self.fan_out(Rc::new(frame), kind, global);
            }
            if out.eof && !out.eof_sent && out.buf.is_empty() {
                if let Some(mut frame) = self.pool.take() {
                    frame.fill(FrameHeader::eof(out.kind, out.local_id, out.global_id), b"");
                    let (kind, global) = (out.kind, out.global_id);
                    self.fan_out(Rc::new(frame), kind, global);
                    out.eof_sent = true;
                }
            }
        }
        self.objs.insert(token, obj);
    }

    /// Pack the next message from a task buffer, honoring line boundaries
    /// until a single line overflows the payload.
    fn build_message(pool: &mut FramePool, out: &mut TaskOut) -> Option<Frame> {
        let mut frame = pool.take()?;
        let mut scratch = [0u8; MAX_PAYLOAD];

        let avail = out.buf.peek_line(&mut scratch);
        if avail == 0 {
            pool.put(frame);
            return None;
        }

        let n = if avail >= MAX_PAYLOAD {
            if avail > MAX_PAYLOAD {
                tracing::debug!("{}: line exceeds frame payload, truncating", out.label());
            }
            out.buf.read(&mut scratch[..MAX_PAYLOAD])
        } else if out.eof {
            // stream is final: flush the unterminated tail as-is
            out.buf.read(&mut scratch[..MAX_PAYLOAD])
        } else {
            out.buf.read_line(&mut scratch[..MAX_PAYLOAD])
        };
        if n == 0 {
            // partial line, wait for its newline
            pool.put(frame);
            return None;
        }

        frame
            .fill(FrameHeader::new(out.kind, out.local_id, out.global_id, n as u32), &scratch[..n]);
        Some(frame)
    }

    /// Enqueue a shared frame to every connected client and matching file
    /// sink.
    fn fan_out(&mut self, frame: Rc<Frame>, kind: FrameKind, global_id: u32) {
        for obj in self.objs.values_mut() {
            match obj {
                IoObj::Client(c) => c.out.enqueue(Rc::clone(&frame)),
                IoObj::FileSink(s) if s.wants(kind, global_id) => {
                    let payload = frame.payload();
                    let (written, _) = s.buf.write(payload);
                    if written < payload.len() {
                        s.refused += (payload.len() - written) as u64;
                    }
                }
                _ => {}
            }
        }
        // drop our own handle; with no subscribers this recycles at once
        self.pool.release(frame);
    }

    /// Deliver a complete input frame to the addressed stdin queue(s).
    fn route_input(&mut self, frame: Frame) {
        let Ok(header) = frame.header() else { return };
        let shared = Rc::new(frame);
        for obj in self.objs.values_mut() {
            if let IoObj::TaskIn(t) = obj {
                if t.fd.is_none() {
                    continue;
                }
                let matched = match header.kind {
                    FrameKind::StdinAll => true,
                    FrameKind::Stdin => t.global_id == header.global_task,
                    _ => false,
                };
                if matched {
                    t.out.enqueue(Rc::clone(&shared));
                }
            }
        }
        self.pool.release(shared);
    }

    fn dispatch(&mut self, token: Token, readiness: Readiness) {
        let Some(mut obj) = self.objs.remove(&token) else { return };
        let mut closed = false;
        match &mut obj {
            IoObj::TaskOut(out) => Self::task_out_read(out, readiness),
            IoObj::TaskIn(t) => Self::task_in_write(&mut self.pool, t),
            IoObj::Client(c) => {
                let mut routed = None;
                if readiness.readable || readiness.hangup {
                    routed = Self::client_read(&mut self.pool, c);
                }
                if readiness.writable {
                    closed = !Self::client_write(&mut self.pool, c);
                }
                if readiness.error && !closed {
                    c.err.update(ErrorKind::Poll, Errno::EIO, &c.label());
                    closed = true;
                }
                if closed {
                    if let Some((frame, _)) = c.incoming.body.take() {
                        self.pool.put(frame);
                    }
                    for f in c.out.drain() {
                        self.pool.release(f);
                    }
                }
                if let Some(frame) = routed {
                    if !closed {
                        self.objs.insert(token, obj);
                    }
                    self.route_input(frame);
                    return;
                }
            }
            IoObj::FileSink(s) => {
                let want = s.buf.unread();
                if let Err(e) = s.buf.read_to_fd(s.fd.as_fd(), want) {
                    s.err.update(ErrorKind::Write, e, &s.label());
                    // a file that stopped accepting writes must not block
                    // step teardown; account the backlog as refused
                    let mut scratch = [0u8; 512];
                    loop {
                        let n = s.buf.read(&mut scratch);
                        if n == 0 {
                            break;
                        }
                        s.refused += n as u64;
                    }
                }
            }
            IoObj::FileSource(_) => {
                self.objs.insert(token, obj);
                self.file_source_read(token);
                return;
            }
        }
        if !closed {
            self.objs.insert(token, obj);
        }
    }

    fn task_out_read(out: &mut TaskOut, readiness: Readiness) {
        let Some(fd) = &out.fd else { return };
        if readiness.readable || readiness.hangup {
            match out.buf.write_from_fd(fd.as_raw_fd(), usize::MAX) {
                Ok(0) => {
                    tracing::debug!("{}: eof", out.label());
                    out.eof = true;
                    out.fd = None;
                }
                Ok(_) => {}
                Err(Errno::EAGAIN) => {}
                Err(e) => {
                    out.err.update(ErrorKind::Read, e, &out.label());
                    out.eof = true;
                    out.fd = None;
                }
            }
        } else if readiness.error {
            out.err.update(ErrorKind::Poll, Errno::EIO, &out.label());
            out.eof = true;
            out.fd = None;
        }
    }

    /// Write pending stdin frames into the task pipe. A zero-length frame
    /// closes the pipe (EOF for the task), exactly once.
    fn task_in_write(pool: &mut FramePool, t: &mut TaskStdin) {
        loop {
            if t.fd.is_none() {
                for f in t.out.drain() {
                    pool.release(f);
                }
                return;
            }
            if t.out.cur.is_none() {
                let Some(msg) = t.out.queue.pop_front() else { return };
                if msg.payload_len() == 0 {
                    tracing::debug!("{}: closing stdin", t.label());
                    t.fd = None;
                    pool.release(msg);
                    continue;
                }
                t.out.remaining = msg.payload_len();
                t.out.cur = Some(msg);
            }

            let Some(msg) = t.out.cur.clone() else { return };
            let payload = msg.payload();
            let offset = payload.len() - t.out.remaining;
            let Some(fd) = &t.fd else { return };
            match nix::unistd::write(fd.as_fd(), &payload[offset..]) {
                Ok(n) => {
                    t.out.remaining -= n;
                    if t.out.remaining == 0 {
                        t.out.cur = None;
                        pool.release(msg);
                    } else {
                        return;
                    }
                }
                Err(Errno::EAGAIN) => return,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    t.err.update(ErrorKind::Write, e, &t.label());
                    t.fd = None;
                }
            }
        }
    }

    /// Read from a client socket. Returns a completed input frame ready
    /// for routing, if one finished this pass.
    fn client_read(pool: &mut FramePool, c: &mut Client) -> Option<Frame> {
        if c.incoming.eof {
            return None;
        }
        // header phase
        if c.incoming.body.is_none() {
            if !pool.has_free() {
                return None;
            }
            while c.incoming.hdr_got < c.incoming.hdr_buf.len() {
                let got = c.incoming.hdr_got;
                match nix::unistd::read(c.fd.as_raw_fd(), &mut c.incoming.hdr_buf[got..]) {
                    Ok(0) => {
                        tracing::debug!("{}: eof on header", c.label());
                        c.incoming.eof = true;
                        return None;
                    }
                    Ok(n) => c.incoming.hdr_got += n,
                    Err(Errno::EAGAIN) => return None,
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        c.err.update(ErrorKind::Read, e, &c.label());
                        c.incoming.eof = true;
                        return None;
                    }
                }
            }
            c.incoming.hdr_got = 0;
            let header = match FrameHeader::decode(&c.incoming.hdr_buf) {
                Ok(h) if h.kind.is_input() => h,
                Ok(h) => {
                    tracing::error!("{}: unexpected frame type {:?}", c.label(), h.kind);
                    c.incoming.eof = true;
                    return None;
                }
                Err(e) => {
                    tracing::error!("{}: bad frame header: {}", c.label(), e);
                    c.incoming.eof = true;
                    return None;
                }
            };
            let mut frame = pool.take()?;
            frame.begin(header);
            let len = header.length as usize;
            c.incoming.body = Some((frame, len));
        }

        // body phase
        loop {
            let outcome = {
                let (frame, remaining) = c.incoming.body.as_mut()?;
                if *remaining == 0 {
                    break;
                }
                let filled = frame.payload_len() - *remaining;
                match nix::unistd::read(c.fd.as_raw_fd(), &mut frame.payload_mut()[filled..]) {
                    Ok(0) => BodyRead::Eof,
                    Ok(n) => {
                        *remaining -= n;
                        BodyRead::More
                    }
                    Err(Errno::EAGAIN) => BodyRead::Wait,
                    Err(Errno::EINTR) => BodyRead::More,
                    Err(e) => BodyRead::Failed(e),
                }
            };
            match outcome {
                BodyRead::More => {}
                BodyRead::Wait => return None,
                BodyRead::Eof => {
                    tracing::debug!("{}: eof mid-frame", c.label());
                    c.incoming.eof = true;
                    if let Some((frame, _)) = c.incoming.body.take() {
                        pool.put(frame);
                    }
                    return None;
                }
                BodyRead::Failed(e) => {
                    c.err.update(ErrorKind::Read, e, &c.label());
                    c.incoming.eof = true;
                    if let Some((frame, _)) = c.incoming.body.take() {
                        pool.put(frame);
                    }
                    return None;
                }
            }
        }

        c.incoming.body.take().map(|(frame, _)| frame)
    }

    /// Write queued frames to the client socket. Returns false when the
    /// connection is gone and the object should be removed.
    fn client_write(pool: &mut FramePool, c: &mut Client) -> bool {
        loop {
            if c.out.cur.is_none() {
                let Some(msg) = c.out.queue.pop_front() else { return true };
                c.out.remaining = msg.wire_len();
                c.out.cur = Some(msg);
            }
            let Some(msg) = c.out.cur.clone() else { return true };
            let bytes = msg.bytes();
            let offset = bytes.len() - c.out.remaining;
            match nix::unistd::write(c.fd.as_fd(), &bytes[offset..]) {
                Ok(n) => {
                    c.out.remaining -= n;
                    if c.out.remaining == 0 {
                        c.out.cur = None;
                        pool.release(msg);
                    } else {
                        return true;
                    }
                }
                Err(Errno::EAGAIN) => return true,
                Err(Errno::EINTR) => continue,
                Err(Errno::EPIPE) | Err(Errno::ECONNRESET) => {
                    // not an error when the task side is what finished
                    tracing::debug!("{}: peer disconnected", c.label());
                    return false;
                }
                Err(e) => {
                    c.err.update(ErrorKind::Write, e, &c.label());
                    return false;
                }
            }
        }
    }

    fn file_source_read(&mut self, token: Token) {
        if !self.pool.has_free() {
            return;
        }
        let mut scratch = [0u8; MAX_PAYLOAD];
        let header = {
            let Some(IoObj::FileSource(src)) = self.objs.get_mut(&token) else { return };
            match nix::unistd::read(src.fd.as_raw_fd(), &mut scratch) {
                Ok(0) => {
                    src.eof_sent = true;
                    src.header(0)
                }
                Ok(n) => src.header(n as u32),
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => return,
                Err(e) => {
                    src.err.update(ErrorKind::Read, e, &src.label());
                    src.eof_sent = true;
                    src.header(0)
                }
            }
        };
        let Some(mut frame) = self.pool.take() else { return };
        frame.fill(header, &scratch[..header.length as usize]);
        self.route_input(frame);
    }

    /// The step is over when shutdown has been requested, every stream
    /// EOF is out, and nothing remains queued anywhere.
    fn finished(&self) -> bool {
        if !self.shutdown {
            return false;
        }
        self.objs.values().all(|obj| match obj {
            IoObj::TaskOut(t) => t.eof_sent || (t.fd.is_none() && t.buf.is_empty()),
            IoObj::TaskIn(_) => true,
            IoObj::Client(c) => !c.out.has_pending(),
            IoObj::FileSink(s) => s.buf.is_empty(),
            IoObj::FileSource(_) => true,
        })
    }

    /// Drop every object so nothing stays registered past step-complete.
    fn teardown(&mut self) {
        for (_, obj) in std::mem::take(&mut self.objs) {
            match obj {
                IoObj::TaskOut(t) => {
                    self.summary.dropped_bytes += t.buf.dropped();
                    if !t.buf.is_empty() {
                        tracing::error!(
                            "{}: {} bytes of output unprocessed",
                            t.label(),
                            t.buf.unread()
                        );
                    }
                }
                IoObj::FileSink(s) => self.summary.refused_bytes += s.refused,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "step_io_tests.rs"]
mod tests;
