// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task exit bookkeeping on the job-manager side.

use nix::errno::Errno;
use std::os::fd::RawFd;
use stepd_wire::{ExitRecord, EXIT_RECORD_LEN};

/// Mutable launch-time state of one task.
#[derive(Debug, Clone, Copy)]
pub struct TaskState {
    pub global_id: u32,
    pub pid: i32,
    pub exited: bool,
    /// The exit has been delivered upstream.
    pub sent: bool,
    pub status: i32,
}

/// The job manager's view of every task in the step.
#[derive(Debug)]
pub struct TaskStates {
    tasks: Vec<TaskState>,
}

impl TaskStates {
    pub fn new(global_ids: &[u32]) -> Self {
        Self {
            tasks: global_ids
                .iter()
                .map(|gid| TaskState {
                    global_id: *gid,
                    pid: 0,
                    exited: false,
                    sent: false,
                    status: 0,
                })
                .collect(),
        }
    }

    pub fn set_pid(&mut self, local_id: usize, pid: i32) {
        if let Some(t) = self.tasks.get_mut(local_id) {
            t.pid = pid;
        }
    }

    pub fn pids(&self) -> Vec<i32> {
        self.tasks.iter().map(|t| t.pid).collect()
    }

    /// Record an exit; a task exits at most once.
    pub fn mark_exited(&mut self, local_id: usize, status: i32) {
        let Some(t) = self.tasks.get_mut(local_id) else {
            tracing::error!("exit record for unknown task {}", local_id);
            return;
        };
        if t.exited {
            tracing::debug!("task {} reported exited twice", local_id);
            return;
        }
        t.exited = true;
        t.sent = false;
        t.status = status;
    }

    /// Mark every not-yet-exited task with `status` (session manager
    /// died before reaping them).
    pub fn mark_unexited(&mut self, status: i32) {
        for t in &mut self.tasks {
            if !t.exited {
                t.exited = true;
                t.sent = false;
                t.status = status;
            }
        }
    }

    pub fn all_exited(&self) -> bool {
        self.tasks.iter().all(|t| t.exited)
    }

    /// Take the next batch of undelivered exits sharing one status.
    ///
    /// Returns the global ids and the shared status, marking them
    /// delivered. `None` when nothing is pending.
    pub fn take_pending_group(&mut self) -> Option<(Vec<u32>, i32)> {
        let mut status = 0;
        let mut picked = false;
        let mut ids = Vec::new();
        for t in &mut self.tasks {
            if !t.exited || t.sent {
                continue;
            }
            if !picked {
                status = t.status;
                picked = true;
            } else if t.status != status {
                continue;
            }
            ids.push(t.global_id);
            t.sent = true;
        }
        if ids.is_empty() {
            None
        } else {
            Some((ids, status))
        }
    }

    /// The raw status of local task 0 (a batch step's script).
    pub fn first_status(&self) -> i32 {
        self.tasks.first().map(|t| t.status).unwrap_or(0)
    }
}

/// What draining the control pipe produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Drain {
    /// Records read (possibly zero); the pipe is still open.
    Open(Vec<ExitRecord>),
    /// The session manager closed its end.
    Eof(Vec<ExitRecord>),
}

/// Read exit records until the nonblocking pipe runs dry or closes.
pub fn drain_exit_records(fd: RawFd) -> Result<Drain, Errno> {
    let mut records = Vec::new();
    let mut buf = [0u8; EXIT_RECORD_LEN];
    loop {
        let mut got = 0;
        while got < buf.len() {
            match nix::unistd::read(fd, &mut buf[got..]) {
                Ok(0) => {
                    if got > 0 {
                        tracing::error!("truncated exit record ({} bytes)", got);
                    }
                    return Ok(Drain::Eof(records));
                }
                Ok(n) => got += n,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) if got == 0 => return Ok(Drain::Open(records)),
                // mid-record: the rest is on its way
                Err(Errno::EAGAIN) => continue,
                Err(e) => return Err(e),
            }
        }
        match ExitRecord::decode(&buf) {
            Ok(rec) => records.push(rec),
            Err(_) => return Ok(Drain::Open(records)),
        }
    }
}

#[cfg(test)]
#[path = "exits_tests.rs"]
mod tests;
