// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Companion-thread harness for the IO engine.
//!
//! The job manager owns an [`IoThread`]; the engine itself lives entirely
//! on the spawned thread. Every command is followed by a wake kick so the
//! reactor observes it promptly.

use crate::reactor::{WakeHandle, WakePipe};
use crate::step_io::{IoCommand, IoSummary, StepIo, TaskIoFds};
use crate::IoEngineError;
use std::os::fd::OwnedFd;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use stepd_wire::FrameKind;

/// Handle to a running IO engine thread.
pub struct IoThread {
    handle: Option<JoinHandle<Result<IoSummary, IoEngineError>>>,
    wake: WakeHandle,
    tx: Sender<IoCommand>,
}

impl IoThread {
    /// Start the engine on its own thread.
    pub fn spawn(tasks: Vec<TaskIoFds>) -> Result<Self, IoEngineError> {
        let wake = WakePipe::new()?;
        let wake_handle = wake.handle();
        let (tx, rx) = std::sync::mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("step-io".to_string())
            .spawn(move || StepIo::new(tasks, wake, rx).run())
            .map_err(|_| IoEngineError::ThreadGone)?;

        Ok(Self { handle: Some(handle), wake: wake_handle, tx })
    }

    fn send(&self, cmd: IoCommand) -> Result<(), IoEngineError> {
        self.tx.send(cmd).map_err(|_| IoEngineError::ThreadGone)?;
        self.wake.kick();
        Ok(())
    }

    /// Attach a connected client socket (session header already sent).
    pub fn add_client(&self, fd: OwnedFd, replay: bool) -> Result<(), IoEngineError> {
        self.send(IoCommand::AddClient { fd, replay })
    }

    /// Capture one stream into a local file.
    pub fn add_file_sink(
        &self,
        fd: OwnedFd,
        kind: FrameKind,
        task: Option<u32>,
    ) -> Result<(), IoEngineError> {
        self.send(IoCommand::AddFileSink { fd, kind, task })
    }

    /// Feed task stdin from a local file.
    pub fn add_file_source(&self, fd: OwnedFd, target: Option<u32>) -> Result<(), IoEngineError> {
        self.send(IoCommand::AddFileSource { fd, target })
    }

    /// Ask the engine to flush and exit once all task streams are final.
    pub fn shutdown(&self) {
        let _ = self.send(IoCommand::Shutdown);
    }

    /// Wait for the engine to finish and collect its totals.
    pub fn join(mut self) -> Result<IoSummary, IoEngineError> {
        let Some(handle) = self.handle.take() else { return Err(IoEngineError::ThreadGone) };
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(IoEngineError::ThreadGone),
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        // a forgotten engine would poll forever; make sure it can exit
        if self.handle.is_some() {
            let _ = self.tx.send(IoCommand::Shutdown);
            self.wake.kick();
        }
    }
}
