// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded byte ring with line-aware reads and replay.
//!
//! Task output lands here before being packed into frames. The ring keeps
//! a bounded window of already-consumed bytes so a client attaching to a
//! running task can be shown recent complete lines ([`replay_line`]).
//!
//! Two overwrite disciplines exist:
//! - [`Overwrite::WrapOnce`] (task output): once the unread region is
//!   full, the oldest unread bytes are dropped to admit new ones and the
//!   loss is accounted. A drop also forfeits the replay window.
//! - [`Overwrite::Never`] (input-side sinks): excess bytes are refused
//!   and the caller sees a partial write count.
//!
//! [`replay_line`]: BoundedBuffer::replay_line

use nix::errno::Errno;
use std::os::fd::{AsFd, RawFd};

/// Default number of consumed bytes retained for client replay.
pub const REPLAY_CEILING: usize = 256;

/// Overwrite discipline for a [`BoundedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    /// Refuse excess bytes; the writer sees a partial count.
    Never,
    /// Drop the oldest unread bytes to admit new ones, with accounting.
    WrapOnce,
}

/// Single-producer/single-consumer byte ring.
///
/// Capacity grows on demand from `min` up to `max` (unread bytes), plus a
/// fixed replay window of consumed bytes.
#[derive(Debug)]
pub struct BoundedBuffer {
    buf: Vec<u8>,
    /// Oldest retained byte (start of the replay region).
    start: u64,
    /// Next unread byte.
    rd: u64,
    /// Next write position.
    wr: u64,
    max: usize,
    replay_limit: usize,
    mode: Overwrite,
    dropped: u64,
}

impl BoundedBuffer {
    pub fn new(min: usize, max: usize, mode: Overwrite) -> Self {
        let min = min.clamp(1, max.max(1));
        Self {
            buf: vec![0; min],
            start: 0,
            rd: 0,
            wr: 0,
            max: max.max(1),
            replay_limit: REPLAY_CEILING,
            mode,
            dropped: 0,
        }
    }

    /// Override the replay window size (0 disables replay).
    pub fn with_replay(mut self, bytes: usize) -> Self {
        self.replay_limit = bytes;
        self
    }

    /// Bytes written but not yet consumed.
    pub fn unread(&self) -> usize {
        (self.wr - self.rd) as usize
    }

    /// Room left for new bytes without dropping.
    pub fn free(&self) -> usize {
        self.max - self.unread()
    }

    /// Total bytes dropped by the wrap-once discipline.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.unread() == 0
    }

    fn retained(&self) -> usize {
        (self.rd - self.start) as usize
    }

    fn resident(&self) -> usize {
        (self.wr - self.start) as usize
    }

    fn idx(&self, pos: u64) -> usize {
        (pos % self.buf.len() as u64) as usize
    }

    fn byte_at(&self, pos: u64) -> u8 {
        self.buf[self.idx(pos)]
    }

    /// Copy the ring range [from, to) into `out` (caller sizes `out`).
    fn copy_range(&self, from: u64, to: u64, out: &mut [u8]) {
        let mut pos = from;
        let mut written = 0;
        while pos < to && written < out.len() {
            let i = self.idx(pos);
            let contiguous = (self.buf.len() - i).min((to - pos) as usize).min(out.len() - written);
            out[written..written + contiguous].copy_from_slice(&self.buf[i..i + contiguous]);
            written += contiguous;
            pos += contiguous as u64;
        }
    }

    /// Grow (re-linearize) so the allocation can hold `needed` resident bytes.
    fn grow(&mut self, needed: usize) {
        if needed <= self.buf.len() {
            return;
        }
        let ceiling = self.max + self.replay_limit;
        let target = needed.next_power_of_two().min(ceiling).max(needed);
        let mut fresh = vec![0; target];
        let resident = self.resident();
        let retained = self.retained() as u64;
        self.copy_range(self.start, self.wr, &mut fresh[..resident]);
        self.buf = fresh;
        self.start = 0;
        self.rd = retained;
        self.wr = resident as u64;
    }

    /// Drop the replay window down to its configured size.
    fn trim_replay(&mut self) {
        if self.retained() > self.replay_limit {
            self.start = self.rd - self.replay_limit as u64;
        }
    }

    /// Write bytes under the configured discipline.
    ///
    /// Returns `(written, dropped)`: how many of `bytes` were admitted and
    /// how many previously buffered bytes were evicted to admit them.
    pub fn write(&mut self, bytes: &[u8]) -> (usize, usize) {
        self.trim_replay();

        let mut input = bytes;
        let mut evicted = 0usize;

        match self.mode {
            Overwrite::Never => {
                let admit = input.len().min(self.free());
                input = &input[..admit];
            }
            Overwrite::WrapOnce => {
                if input.len() > self.max {
                    // only the newest window can survive
                    let skip = input.len() - self.max;
                    self.dropped += skip as u64;
                    self.start = self.rd;
                    input = &input[skip..];
                }
                let over = (self.unread() + input.len()).saturating_sub(self.max);
                if over > 0 {
                    self.rd += over as u64;
                    self.start = self.rd;
                    self.dropped += over as u64;
                    evicted = over;
                }
            }
        }

        if input.is_empty() {
            return (0, evicted);
        }

        self.grow(self.resident() + input.len());

        let mut pos = self.wr;
        let mut remaining = input;
        while !remaining.is_empty() {
            let i = self.idx(pos);
            let contiguous = (self.buf.len() - i).min(remaining.len());
            self.buf[i..i + contiguous].copy_from_slice(&remaining[..contiguous]);
            remaining = &remaining[contiguous..];
            pos += contiguous as u64;
        }
        self.wr = pos;

        (input.len(), evicted)
    }

    /// Consume up to `out.len()` bytes, line boundaries ignored.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = self.unread().min(out.len());
        self.copy_range(self.rd, self.rd + n as u64, &mut out[..n]);
        self.rd += n as u64;
        n
    }

    /// Copy the next line into `out` without consuming.
    ///
    /// Returns the number of bytes available for that line, which may
    /// exceed `out.len()`: the line terminates at the first newline, or at
    /// the current end of data when no newline is buffered yet.
    pub fn peek_line(&self, out: &mut [u8]) -> usize {
        let avail = match self.find_newline(self.rd) {
            Some(pos) => (pos - self.rd + 1) as usize,
            None => self.unread(),
        };
        let n = avail.min(out.len());
        self.copy_range(self.rd, self.rd + n as u64, &mut out[..n]);
        avail
    }

    /// Consume as many complete lines as fit in `out`.
    ///
    /// Returns 0 when no complete line is buffered (a partial line stays
    /// until its newline arrives or the buffer reaches `out.len()` worth
    /// of data and the caller switches to [`read`]).
    ///
    /// [`read`]: BoundedBuffer::read
    pub fn read_line(&mut self, out: &mut [u8]) -> usize {
        let mut end = self.rd;
        let mut scan = self.rd;
        while let Some(nl) = self.find_newline(scan) {
            let len = (nl - self.rd + 1) as usize;
            if len > out.len() {
                break;
            }
            end = nl + 1;
            scan = nl + 1;
        }
        let n = (end - self.rd) as usize;
        if n == 0 {
            return 0;
        }
        self.copy_range(self.rd, end, &mut out[..n]);
        self.rd = end;
        n
    }

    /// Copy the last `max_lines` complete consumed lines still resident.
    ///
    /// Returns the number of bytes copied; fewer lines are returned when
    /// the data has been evicted or `out` is too small.
    pub fn replay_line(&self, out: &mut [u8], max_lines: usize) -> usize {
        if max_lines == 0 || self.rd == self.start {
            return 0;
        }
        // line end offsets (one past the newline) within [start, rd)
        let mut ends = Vec::new();
        let mut scan = self.start;
        while scan < self.rd {
            if self.byte_at(scan) == b'\n' {
                ends.push(scan + 1);
            }
            scan += 1;
        }
        if ends.is_empty() {
            return 0;
        }
        let last_end = *ends.last().unwrap_or(&self.start);
        // walk backwards until line count or size budget is exhausted
        let mut first = ends.len().saturating_sub(max_lines);
        let line_start = |i: usize| if i == 0 { self.start } else { ends[i - 1] };
        while first < ends.len() && (last_end - line_start(first)) as usize > out.len() {
            first += 1;
        }
        if first >= ends.len() {
            return 0;
        }
        let begin = line_start(first);
        let n = (last_end - begin) as usize;
        self.copy_range(begin, last_end, &mut out[..n]);
        n
    }

    /// Read from `fd` into the ring, at most `limit` bytes.
    ///
    /// Returns `Ok(0)` on EOF. `limit` is additionally capped by [`free`],
    /// so a full ring reads nothing.
    ///
    /// [`free`]: BoundedBuffer::free
    pub fn write_from_fd(&mut self, fd: RawFd, limit: usize) -> Result<usize, Errno> {
        let mut tmp = [0u8; 4096];
        let want = limit.min(self.free()).min(tmp.len());
        if want == 0 {
            return Err(Errno::EAGAIN);
        }
        loop {
            match nix::unistd::read(fd, &mut tmp[..want]) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    self.write(&tmp[..n]);
                    return Ok(n);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Drain up to `limit` unread bytes to `fd`. EAGAIN reports 0 written.
    pub fn read_to_fd(&mut self, fd: impl AsFd, limit: usize) -> Result<usize, Errno> {
        let want = self.unread().min(limit);
        if want == 0 {
            return Ok(0);
        }
        let i = self.idx(self.rd);
        let contiguous = (self.buf.len() - i).min(want);
        loop {
            match nix::unistd::write(fd.as_fd(), &self.buf[i..i + contiguous]) {
                Ok(n) => {
                    self.rd += n as u64;
                    return Ok(n);
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Ok(0),
                Err(e) => return Err(e),
            }
        }
    }

    fn find_newline(&self, from: u64) -> Option<u64> {
        let mut pos = from;
        while pos < self.wr {
            if self.byte_at(pos) == b'\n' {
                return Some(pos);
            }
            pos += 1;
        }
        None
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
