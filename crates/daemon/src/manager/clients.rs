// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side IO wiring for a step.
//!
//! Outbound connections to each client's IO endpoint (session header
//! first), stdio file overrides, and the notification pushes to response
//! endpoints.

use crate::config::Config;
use crate::protocol::{notify_endpoint, ClientMsg};
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;
use stepd_core::{ClientEndpoint, StepDescriptor};
use stepd_io::IoThread;
use stepd_wire::{FrameKind, SessionHeader};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to one client's IO endpoint and complete the header exchange.
pub fn connect_client(endpoint: &ClientEndpoint, node_index: u32) -> std::io::Result<TcpStream> {
    let Some(addr) = endpoint.io_addr else {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "no io address"));
    };
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    let header = SessionHeader::new(&endpoint.auth_key, node_index)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    stream.write_all(&header.encode())?;
    stream.flush()?;
    Ok(stream)
}

/// Wire one endpoint into a running engine: socket, file sinks, stdin
/// file. Called at launch (replay off) and on late attach (replay on).
pub fn wire_endpoint(
    io: &IoThread,
    endpoint: &ClientEndpoint,
    node_index: u32,
    replay: bool,
) -> std::io::Result<()> {
    if endpoint.io_addr.is_some() {
        let stream = connect_client(endpoint, node_index)?;
        io.add_client(stream.into(), replay)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()))?;
    }
    if let Some(path) = &endpoint.stdout_path {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        io.add_file_sink(file.into(), FrameKind::Stdout, None)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()))?;
    }
    if let Some(path) = &endpoint.stderr_path {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        io.add_file_sink(file.into(), FrameKind::Stderr, None)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()))?;
    }
    if let Some(path) = &endpoint.stdin_path {
        let file = std::fs::File::open(path)?;
        io.add_file_source(file.into(), None)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()))?;
    }
    Ok(())
}

/// Push the launch result to every endpoint that asked for one.
pub fn send_launch_result(config: &Config, desc: &StepDescriptor, return_code: i32, pids: &[i32]) {
    if desc.is_batch() || desc.is_spawn() {
        return;
    }
    let msg = ClientMsg::LaunchResult {
        node_name: config.node_name.clone(),
        node_index: desc.node_index,
        return_code,
        pids: pids.to_vec(),
    };
    for endpoint in &desc.clients {
        let Some(addr) = endpoint.resp_addr else { continue };
        if let Err(e) = notify_endpoint(addr, &msg, NOTIFY_TIMEOUT) {
            tracing::error!("launch response to {}: {}", addr, e);
        }
    }
}

/// Push one aggregated task-exit message to every response endpoint.
pub fn send_task_exits(desc: &StepDescriptor, task_ids: &[u32], status: i32) {
    tracing::debug!("sending task exit msg for {} tasks", task_ids.len());
    let msg = ClientMsg::TaskExited { task_ids: task_ids.to_vec(), status };
    for endpoint in &desc.clients {
        let Some(addr) = endpoint.resp_addr else { continue };
        if let Err(e) = notify_endpoint(addr, &msg, NOTIFY_TIMEOUT) {
            tracing::error!("task exit msg to {}: {}", addr, e);
        }
    }
}

/// Deterministic pre-notification delay for very wide steps, spreading
/// synchronized exit traffic away from a single instant.
pub fn exit_jitter(desc: &StepDescriptor) -> Duration {
    if desc.node_count <= 100 {
        return Duration::ZERO;
    }
    let max_ms = u64::from(3 * desc.node_count);
    let seed = u64::from(desc.key.job_id).wrapping_mul(2_654_435_761).wrapping_add(u64::from(desc.node_index));
    Duration::from_millis(seed % (max_ms + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepd_core::test_support::descriptor;

    #[test]
    fn narrow_steps_get_no_jitter() {
        let desc = descriptor(1, 0, 1, &["/bin/true"]);
        assert_eq!(exit_jitter(&desc), Duration::ZERO);
    }

    #[test]
    fn wide_steps_get_bounded_deterministic_jitter() {
        let mut desc = descriptor(1, 0, 1, &["/bin/true"]);
        desc.node_count = 512;
        let a = exit_jitter(&desc);
        let b = exit_jitter(&desc);
        assert_eq!(a, b);
        assert!(a <= Duration::from_millis(u64::from(3 * desc.node_count)));
    }

    #[test]
    fn connect_client_requires_an_address() {
        let endpoint = stepd_core::test_support::endpoint();
        assert!(connect_client(&endpoint, 0).is_err());
    }
}
