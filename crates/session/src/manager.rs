// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session-manager child.
//!
//! Runs as the target user inside its own POSIX session and owns the
//! step's tasks. Launch-phase failures exit through the fixed code table
//! in `stepd_core::exit::session_exit`; after the fork loop the process
//! reports task exits over the control pipe until every child is reaped.

use crate::interconnect::{AttachCtx, Interconnect};
use crate::spawn::CONTROL_FD;
use crate::task::{spawn_task, TaskStdio};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{Gid, Pid, Uid};
use std::collections::HashMap;
use std::io::Read;
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use stepd_core::exit::{session_exit, WaitCode};
use stepd_core::{task_env, StepDescriptor, UserIdentity};
use stepd_wire::{ExitRecord, PidRecord};

/// Entry point for the `session-manager` subcommand: read the descriptor
/// from stdin and run the session. Returns the process exit code.
pub fn session_main(interconnect: &dyn Interconnect) -> i32 {
    let mut raw = Vec::new();
    if let Err(e) = std::io::stdin().read_to_end(&mut raw) {
        tracing::error!("reading step descriptor: {}", e);
        return session_exit::EXEC;
    }
    let desc: StepDescriptor = match serde_json::from_slice(&raw) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("parsing step descriptor: {}", e);
            return session_exit::EXEC;
        }
    };
    run_session(desc, interconnect, CONTROL_FD)
}

/// Run the session for `desc`, reporting over `control_fd`.
pub fn run_session(desc: StepDescriptor, interconnect: &dyn Interconnect, control_fd: RawFd) -> i32 {
    let mut stdio = match claim_stdio(&desc) {
        Ok(s) => s,
        Err(code) => return code,
    };

    if let Err(e) = stepd_sys::install_noop_sigchld() {
        tracing::error!("{}", e);
        return session_exit::EXEC;
    }

    // fabric programming may need privilege, so it precedes demotion
    if !desc.is_batch() {
        if let Err(e) = interconnect.init(&desc.key, desc.identity.uid) {
            tracing::error!("{}", e);
            return session_exit::INTERCONNECT;
        }
    }

    if become_user(&desc.identity).is_err() {
        return session_exit::UID_GID;
    }

    if nix::unistd::setsid().is_err() {
        tracing::error!("setsid: {}", Errno::last().desc());
        return session_exit::SETSID;
    }

    if let Err(e) = nix::unistd::chdir(&desc.cwd) {
        tracing::error!(
            "couldn't chdir to `{}`: {}: going to /tmp instead",
            desc.cwd.display(),
            e.desc()
        );
        if nix::unistd::chdir(Path::new("/tmp")).is_err() {
            tracing::error!("couldn't chdir to /tmp either. dying.");
            return session_exit::CHDIR;
        }
    }

    if !desc.is_spawn() {
        if let Err(e) = crate::limits::apply(&desc.limits) {
            tracing::warn!("unable to set user limits: {}", e);
        }
    }

    make_tmpdir(&desc.env);

    let sigs = stepd_sys::sigset(stepd_sys::SESSION_SIGNALS);
    if let Err(e) = stepd_sys::block(&sigs) {
        tracing::error!("unable to block signals: {}", e);
        return session_exit::EXEC;
    }

    let mut pids: HashMap<i32, u32> = HashMap::new();
    let mut pgrp: Option<Pid> = None;

    for i in 0..desc.ntasks() {
        let local_id = i as u32;
        let global_id = desc.tasks[i].global_id;
        let mut env = task_env(&desc, local_id);

        if !desc.is_batch() {
            let ctx = AttachCtx {
                node_index: desc.node_index,
                node_count: desc.node_count,
                total_tasks: desc.total_tasks,
                local_id,
                global_id,
            };
            match interconnect.attach(&desc.key, ctx) {
                Ok(extra) => {
                    for (k, v) in extra {
                        stepd_core::env::set_env(&mut env, &k, v);
                    }
                }
                Err(e) => {
                    tracing::error!("unable to attach to interconnect: {}", e);
                    return session_exit::INTERCONNECT;
                }
            }
        }

        let Some(io) = stdio[i].take() else { return session_exit::EXEC };
        match spawn_task(&desc, &env, io, pgrp) {
            Ok(child) => {
                let pid = child.id() as i32;
                tracing::info!("task {} ({}) started", global_id, pid);
                if pgrp.is_none() {
                    pgrp = Some(Pid::from_raw(pid));
                }
                if write_control(control_fd, &PidRecord(pid).encode()).is_err() {
                    tracing::error!("unable to report task pid");
                    return session_exit::EXEC;
                }
                pids.insert(pid, local_id);
                if desc.parallel_debug {
                    crate::pdebug::trace_process(Pid::from_raw(pid));
                }
                // reaping happens via waitpid(-1); the handle is not used
                drop(child);
            }
            Err(e) => {
                // no child to reap; report the failed task inline so the
                // job manager still sees one pid and one exit per task
                let errno = e.raw_os_error().unwrap_or(nix::libc::ENOENT);
                tracing::error!("exec {}: {}", desc.argv[0], e);
                if write_control(control_fd, &PidRecord(-1).encode()).is_err() {
                    return session_exit::EXEC;
                }
                let record = ExitRecord::new(local_id, WaitCode::raw_exit(errno));
                let _ = write_control(control_fd, &record.encode());
            }
        }
    }

    // every child pipe end left in this process must close now so the IO
    // engine sees EOF when the tasks finish
    stdio.clear();

    wait_for_tasks(&desc, &mut pids, control_fd);

    if !desc.is_batch() {
        if let Err(e) = interconnect.fini(&desc.key) {
            tracing::error!("{}", e);
            return session_exit::INTERCONNECT;
        }
    }

    session_exit::SUCCESS
}

/// Claim the inherited stdio fds (or connect the spawn socket).
fn claim_stdio(desc: &StepDescriptor) -> Result<Vec<Option<TaskStdio>>, i32> {
    if desc.is_spawn() {
        let addr = desc
            .clients
            .first()
            .and_then(|c| c.io_addr)
            .ok_or(session_exit::EXEC)?;
        let sock = std::net::TcpStream::connect(addr).map_err(|e| {
            tracing::error!("connect spawn io stream: {}", e);
            session_exit::EXEC
        })?;
        return Ok(vec![Some(TaskStdio::Socket(sock.into()))]);
    }

    let mut out = Vec::with_capacity(desc.ntasks());
    for t in &desc.tasks {
        let (Some(i), Some(o), Some(e)) = (t.child_stdin, t.child_stdout, t.child_stderr) else {
            tracing::error!("task {} is missing stdio fds", t.local_id);
            return Err(session_exit::EXEC);
        };
        // SAFETY: these fds were created by the job manager for this task
        // and inherited across exec; nothing else owns them here.
        let stdio = unsafe {
            TaskStdio::Pipes {
                stdin: OwnedFd::from_raw_fd(i),
                stdout: OwnedFd::from_raw_fd(o),
                stderr: OwnedFd::from_raw_fd(e),
            }
        };
        out.push(Some(stdio));
    }
    Ok(out)
}

fn become_user(identity: &UserIdentity) -> Result<(), ()> {
    if let Err(e) = nix::unistd::setgid(Gid::from_raw(identity.gid)) {
        tracing::error!("setgid: {}", e.desc());
        return Err(());
    }
    let groups: Vec<Gid> = identity.groups.iter().map(|g| Gid::from_raw(*g)).collect();
    if let Err(e) = nix::unistd::setgroups(&groups) {
        // expected when the launcher itself runs unprivileged
        tracing::debug!("setgroups: {}", e.desc());
    }
    if let Err(e) = nix::unistd::setuid(Uid::from_raw(identity.uid)) {
        tracing::error!("setuid: {}", e.desc());
        return Err(());
    }
    Ok(())
}

/// Create the TMPDIR directory named by the environment, mode 0700.
fn make_tmpdir(env: &[(String, String)]) {
    let Some(tmpdir) = stepd_core::env::get_env(env, "TMPDIR") else { return };
    match nix::unistd::mkdir(Path::new(tmpdir), nix::sys::stat::Mode::S_IRWXU) {
        Ok(()) | Err(Errno::EEXIST) => {}
        Err(e) => tracing::error!("unable to create TMPDIR [{}]: {}", tmpdir, e.desc()),
    }
}

fn write_control(fd: RawFd, bytes: &[u8]) -> Result<(), stepd_sys::SysError> {
    // SAFETY: the control fd stays open for the life of this process.
    let borrowed: BorrowedFd<'_> = unsafe { stepd_sys::fd::borrow_raw(fd) };
    stepd_sys::write_all(borrowed, bytes)
}

/// Reap children until every tracked task has exited, forwarding each
/// exit status over the control pipe.
fn wait_for_tasks(desc: &StepDescriptor, pids: &mut HashMap<i32, u32>, control_fd: RawFd) {
    let sigs = stepd_sys::sigset(stepd_sys::SESSION_SIGNALS);

    while !pids.is_empty() {
        let sig = match stepd_sys::wait_signal(&sigs) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!("{}", e);
                return;
            }
        };
        match sig {
            Signal::SIGCHLD => while !pids.is_empty() && reap_one(desc, pids, control_fd) {},
            Signal::SIGXCPU => tracing::error!("job exceeded timelimit"),
            other => tracing::debug!("caught {}", other),
        }
    }
}

/// Reap a single child if one is waitable. Returns true when a tracked
/// task actually exited (and its record was sent).
fn reap_one(desc: &StepDescriptor, pids: &mut HashMap<i32, u32>, control_fd: RawFd) -> bool {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED;
    let status = match waitpid(None, Some(flags)) {
        Ok(WaitStatus::StillAlive) => return false,
        Ok(status) => status,
        Err(Errno::ECHILD) => {
            // nothing left to wait on; report what we know and stop
            tracing::debug!("waitpid: no remaining children");
            for (_, local) in pids.drain() {
                let record = ExitRecord::new(local, WaitCode::raw_signal(9));
                let _ = write_control(control_fd, &record.encode());
            }
            return false;
        }
        Err(e) => {
            tracing::error!("waitpid: {}", e.desc());
            return false;
        }
    };

    let (pid, raw) = match status {
        WaitStatus::Exited(pid, code) => (pid, WaitCode::raw_exit(code)),
        WaitStatus::Signaled(pid, sig, _core) => (pid, WaitCode::raw_signal(sig as i32)),
        WaitStatus::Stopped(pid, sig) => {
            tracing::info!("task ({}) stopped by {}", pid, sig);
            return false;
        }
        _ => return false,
    };

    let Some(local) = pids.remove(&pid.as_raw()) else {
        tracing::debug!("unknown pid {} exited status {:#06x}", pid, raw);
        return false;
    };

    let global = desc.tasks.get(local as usize).map(|t| t.global_id).unwrap_or(local);
    tracing::info!("task {} ({}) exited status {:#06x}", global, pid, raw);

    let record = ExitRecord::new(local, raw);
    if write_control(control_fd, &record.encode()).is_err() {
        tracing::error!("failed to send task {} exit msg", local);
    }
    true
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
