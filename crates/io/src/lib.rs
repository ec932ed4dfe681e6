// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! stepd-io: the per-step IO engine.
//!
//! A single-threaded reactor carries line-oriented task output to remote
//! clients and client input to task stdin. Task stdout/stderr land in
//! bounded ring buffers, get packed into framed messages drawn from a
//! per-step free list, and fan out to every connected client; client
//! frames fan in to the addressed task's stdin queue. The free list
//! bounds heap churn and doubles as backpressure: an empty list pauses
//! reads from tasks and clients alike until frames drain.
//!
//! The job manager drives the engine from its own thread through
//! [`IoThread`]: commands arrive over a channel and a wake pipe pulls the
//! reactor out of `poll`.

pub mod buffer;
pub mod error_state;
pub mod frames;
pub mod objects;
pub mod pipes;
pub mod reactor;
pub mod step_io;
pub mod thread;

pub use buffer::{BoundedBuffer, Overwrite};
pub use error_state::ErrorState;
pub use frames::{Frame, FramePool};
pub use pipes::TaskPipes;
pub use reactor::{poll_objects, Interest, Readiness, Token, WakeHandle, WakePipe};
pub use step_io::{IoCommand, IoSummary, StepIo, TaskIoFds};
pub use thread::IoThread;

/// Errors surfaced by the IO engine.
#[derive(Debug, thiserror::Error)]
pub enum IoEngineError {
    #[error(transparent)]
    Sys(#[from] stepd_sys::SysError),
    #[error(transparent)]
    Protocol(#[from] stepd_wire::ProtocolError),
    #[error("io thread is gone")]
    ThreadGone,
}
