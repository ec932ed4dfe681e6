// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-step job manager.
//!
//! Runs on a dedicated thread per step (privileged side). Owns the step
//! registry record, the IO engine thread, the session-manager child, pid
//! collection, the exit-collection loop, and teardown. The launch phase
//! refuses to report success before all N task pids have arrived on the
//! control pipe.

mod clients;
mod exits;
mod privs;

pub use exits::{TaskState, TaskStates};

use crate::config::Config;
use crate::registry::{AttachChannel, RegistryError, StepRegistry, StepState};
use exits::Drain;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::Pid;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use stepd_core::exit::WaitCode;
use stepd_core::{StepDescriptor, StepResult};
use stepd_io::{IoThread, TaskIoFds, TaskPipes};
use stepd_session::{spawn_session_manager, Interconnect, SessionHandle};
use stepd_wire::PID_RECORD_LEN;

/// Everything a finished step reports upstream.
#[derive(Debug)]
pub struct StepOutcome {
    pub rc: StepResult,
    /// Raw wait status of local task 0 (the script, for batch steps).
    pub task_rc: i32,
}

/// Borrowed context for one step run.
pub struct StepRun<'a> {
    pub config: &'a Config,
    pub registry: &'a StepRegistry,
    pub interconnect: &'a dyn Interconnect,
}

impl StepRun<'_> {
    /// Run the step to completion. Every failure maps to a step result
    /// and a launch-failure notification where required.
    pub fn run(&self, desc: StepDescriptor) -> StepOutcome {
        let key = desc.key;
        let span = tracing::info_span!("step", step = %key);
        let _guard = span.enter();

        let attach = match self.registry.insert(key, desc.ntasks() as u32) {
            Ok(chan) => chan,
            Err(RegistryError::Exists) => {
                tracing::error!("step already exists");
                return self.launch_fail(&desc, StepResult::StepExists);
            }
            Err(_) => {
                tracing::error!("step registry full");
                return self.launch_fail(&desc, StepResult::TooManySteps);
            }
        };

        let outcome = self.run_registered(desc, attach);
        self.registry.remove(&key);
        outcome
    }

    /// Notify clients of a failed launch and wrap the result.
    fn launch_fail(&self, desc: &StepDescriptor, rc: StepResult) -> StepOutcome {
        clients::send_launch_result(self.config, desc, rc.code(), &[]);
        StepOutcome { rc, task_rc: 0 }
    }

    fn run_registered(&self, mut desc: StepDescriptor, attach: AttachChannel) -> StepOutcome {
        let key = desc.key;

        if !desc.is_batch() {
            if let Err(e) = self.interconnect.preinit(&key) {
                tracing::error!("{}", e);
                return self.launch_fail(&desc, StepResult::InterconnectFailure);
            }
        }

        let sigs = stepd_sys::sigset(stepd_sys::MANAGER_SIGNALS);
        if let Err(e) = stepd_sys::block(&sigs) {
            tracing::error!("{}", e);
            return self.launch_fail(&desc, StepResult::IoSetup);
        }

        // stdio routing: pipes + engine thread, except in spawn flavor
        // where the task talks straight to the client socket
        let (io, child_ends) = if desc.is_spawn() {
            (None, Vec::new())
        } else {
            match self.setup_io(&mut desc) {
                Ok((io, ends)) => (Some(io), ends),
                Err(rc) => return self.launch_fail(&desc, rc),
            }
        };

        let outcome = self.run_session_phase(&desc, attach, io.as_ref(), child_ends);

        if let Some(io) = io {
            io.shutdown();
            match io.join() {
                Ok(summary) if summary.dropped_bytes > 0 => {
                    tracing::warn!(dropped = summary.dropped_bytes, "task output dropped");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("io engine: {}", e),
            }
        }

        if !desc.is_batch() {
            if let Err(e) = self.interconnect.fini(&key) {
                tracing::error!("{}", e);
            }
        }
        self.registry.set_state(&key, StepState::Complete);

        outcome
    }

    /// Create per-task pipes, note the child fds in the descriptor, and
    /// start the engine with the clients wired in. Returns the engine
    /// and the child pipe ends, which must stay open until the session
    /// manager has inherited them.
    fn setup_io(
        &self,
        desc: &mut StepDescriptor,
    ) -> Result<(IoThread, Vec<OwnedFd>), StepResult> {
        let mut parent_ends = Vec::new();
        let mut child_keep = Vec::new();

        for task in &mut desc.tasks {
            let pipes = TaskPipes::create().map_err(|e| {
                tracing::error!("init pipes for task {} failed: {}", task.local_id, e);
                StepResult::IoSetup
            })?;
            task.child_stdin = Some(pipes.child_stdin.as_raw_fd());
            task.child_stdout = Some(pipes.child_stdout.as_raw_fd());
            task.child_stderr = Some(pipes.child_stderr.as_raw_fd());
            parent_ends.push(TaskIoFds {
                local_id: task.local_id as u16,
                global_id: task.global_id,
                stdin_wr: pipes.stdin_wr,
                stdout_rd: pipes.stdout_rd,
                stderr_rd: pipes.stderr_rd,
            });
            child_keep.push(pipes.child_stdin);
            child_keep.push(pipes.child_stdout);
            child_keep.push(pipes.child_stderr);
        }

        let io = IoThread::spawn(parent_ends).map_err(|e| {
            tracing::error!("io engine start: {}", e);
            StepResult::IoSetup
        })?;

        // clients and override files open with the user's permissions
        let guard = privs::drop_privileges(&desc.identity).map_err(|e| {
            tracing::error!("{}", e);
            StepResult::UidGidError
        })?;
        let mut wired = Ok(());
        for endpoint in &desc.clients {
            if let Err(e) = clients::wire_endpoint(&io, endpoint, desc.node_index, false) {
                tracing::error!("connect io: {}", e);
                wired = Err(StepResult::IoSetup);
                break;
            }
        }
        drop(guard);
        wired?;

        Ok((io, child_keep))
    }

    /// Session creation through exit collection.
    fn run_session_phase(
        &self,
        desc: &StepDescriptor,
        attach: AttachChannel,
        io: Option<&IoThread>,
        child_ends: Vec<OwnedFd>,
    ) -> StepOutcome {
        let key = desc.key;

        let helper = self.config.session_helper();
        let mut session = match spawn_session_manager(desc, &helper) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("unable to create session manager: {}", e);
                drop(child_ends);
                return self.launch_fail(desc, StepResult::ExecFailed);
            }
        };
        // the session manager holds its own copies now; dropping ours is
        // what lets the IO engine see EOF when the tasks finish
        drop(child_ends);

        self.registry.set_session_pid(&key, session.pid());

        let global_ids: Vec<u32> = desc.tasks.iter().map(|t| t.global_id).collect();
        let mut states = TaskStates::new(&global_ids);

        // pids arrive in task order before anything else; EOF here means
        // the session manager died during launch. No per-task exits go
        // out on this path: pids were never published, so the clients
        // hear one launch-failure message and nothing else.
        if !self.collect_pids(&mut states, &session, desc.ntasks()) {
            let status = wait_session(&mut session);
            let rc = session_result(status);
            tracing::error!("session manager failed during launch: {}", rc);
            return self.launch_fail(desc, rc);
        }

        self.registry.set_state(&key, StepState::Started);
        tracing::info!("step started, {} tasks", desc.ntasks());
        clients::send_launch_result(self.config, desc, 0, &states.pids());

        let session_status = self.collect_exits(desc, &mut states, &mut session, &attach, io);

        self.registry.set_state(&key, StepState::Ending);

        let rc = {
            let result = session_result(session_status);
            if !matches!(result, StepResult::Success | StepResult::Raw(_)) {
                tracing::error!("session manager: {}", result);
            }
            if !states.all_exited() {
                // the session manager died first: its tasks share the
                // first task's process group, so they can still be killed
                if let Some(&leader) = states.pids().first() {
                    if leader > 0 {
                        let _ = nix::sys::signal::killpg(
                            Pid::from_raw(leader),
                            nix::sys::signal::Signal::SIGKILL,
                        );
                    }
                }
                // tasks the session manager never reported inherit its fate
                states.mark_unexited(session_status);
            }
            result
        };
        self.flush_exits(desc, &mut states);

        if !desc.is_batch() {
            if let Err(e) = self.interconnect.postfini(&key, session.pid()) {
                tracing::error!("{}", e);
            }
        }

        let step_rc = match rc {
            // a batch script's own exit status is not a launcher failure
            StepResult::Raw(_) if desc.is_batch() => StepResult::Success,
            other => other,
        };
        StepOutcome { rc: step_rc, task_rc: states.first_status() }
    }

    /// Read exactly N pid records, in task order.
    fn collect_pids(&self, states: &mut TaskStates, session: &SessionHandle, n: usize) -> bool {
        let fd = session.control_rd.as_raw_fd();
        for i in 0..n {
            let mut buf = [0u8; PID_RECORD_LEN];
            match stepd_sys::read_exact(fd, &mut buf) {
                Ok(len) if len == buf.len() => {}
                Ok(_) => return false,
                Err(e) => {
                    tracing::error!("error obtaining task information: {}", e);
                    return false;
                }
            }
            match stepd_wire::PidRecord::decode(&buf) {
                Ok(rec) => states.set_pid(i, rec.0),
                Err(_) => return false,
            }
        }
        true
    }

    /// Poll the control pipe and the attach channel until every task has
    /// exited or the session manager goes away, then reap the session.
    /// Returns the session manager's raw wait status.
    fn collect_exits(
        &self,
        desc: &StepDescriptor,
        states: &mut TaskStates,
        session: &mut SessionHandle,
        attach: &AttachChannel,
        io: Option<&IoThread>,
    ) -> i32 {
        if let Err(e) = stepd_sys::set_nonblocking(session.control_rd.as_fd()) {
            tracing::error!("{}", e);
        }

        let mut control_open = true;
        while !states.all_exited() {
            let (control_ready, attach_ready) = {
                let mut fds = Vec::with_capacity(2);
                if control_open {
                    fds.push(PollFd::new(session.control_rd.as_fd(), PollFlags::POLLIN));
                }
                fds.push(PollFd::new(attach.pipe_rd.as_fd(), PollFlags::POLLIN));

                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        tracing::error!("wait for task exit: poll: {}", e.desc());
                        break;
                    }
                }

                let attach_ready = fds
                    .last()
                    .and_then(|fd| fd.revents())
                    .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP));
                let control_ready = control_open
                    && fds[0].revents().is_some_and(|r| {
                        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                    });
                (control_ready, attach_ready)
            };

            if attach_ready {
                self.handle_attach_requests(desc, attach, io);
            }

            if control_ready {
                match exits::drain_exit_records(session.control_rd.as_raw_fd()) {
                    Ok(Drain::Open(records)) => {
                        for rec in records {
                            states.mark_exited(rec.task_index as usize, rec.status);
                        }
                    }
                    Ok(Drain::Eof(records)) => {
                        for rec in records {
                            states.mark_exited(rec.task_index as usize, rec.status);
                        }
                        control_open = false;
                        if !states.all_exited() {
                            // session manager died first; collect its
                            // status and let the caller synthesize
                            return wait_session(session);
                        }
                    }
                    Err(e) => {
                        tracing::error!("unable to read task exit codes: {}", e.desc());
                        break;
                    }
                }
                self.flush_exits(desc, states);
            }
        }

        wait_session(session)
    }

    /// Pull queued attach requests and wire each new client in.
    fn handle_attach_requests(
        &self,
        desc: &StepDescriptor,
        attach: &AttachChannel,
        io: Option<&IoThread>,
    ) {
        let mut wake = [0u8; 16];
        let _ = nix::unistd::read(attach.pipe_rd.as_raw_fd(), &mut wake);

        while let Ok(endpoint) = attach.rx.try_recv() {
            tracing::debug!("handling attach request for {}", desc.key);
            let Some(io) = io else {
                tracing::error!("attach to a spawn-flavor step is not possible");
                continue;
            };
            let guard = match privs::drop_privileges(&desc.identity) {
                Ok(g) => g,
                Err(e) => {
                    tracing::error!("{}", e);
                    continue;
                }
            };
            if let Err(e) = clients::wire_endpoint(io, &endpoint, desc.node_index, true) {
                tracing::error!("attach client: {}", e);
            }
            drop(guard);
        }
    }

    /// Deliver aggregated exit notifications until none are pending.
    fn flush_exits(&self, desc: &StepDescriptor, states: &mut TaskStates) {
        while let Some((ids, status)) = states.take_pending_group() {
            let jitter = clients::exit_jitter(desc);
            if !jitter.is_zero() {
                std::thread::sleep(jitter);
            }
            clients::send_task_exits(desc, &ids, status);
        }
    }
}

/// Reap the session manager and return its raw wait status.
fn wait_session(session: &mut SessionHandle) -> i32 {
    match session.child.wait() {
        Ok(status) => {
            if let Some(sig) = status.signal() {
                if sig != 9 {
                    tracing::error!("session manager killed by signal {}", sig);
                }
                // take the whole process group down with it
                let _ = nix::sys::signal::killpg(
                    Pid::from_raw(session.pid()),
                    nix::sys::signal::Signal::SIGKILL,
                );
                WaitCode::raw_signal(sig)
            } else {
                WaitCode::raw_exit(status.code().unwrap_or(0))
            }
        }
        Err(e) => {
            tracing::error!("waitpid: {}", e);
            0
        }
    }
}

/// Map a session-manager wait status onto a step result.
fn session_result(status: i32) -> StepResult {
    match WaitCode::from_raw(status) {
        WaitCode::Signaled(_) | WaitCode::Stopped(_) => StepResult::SessionManagerKilled,
        WaitCode::Exited(code) => StepResult::from_session_exit(code),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
