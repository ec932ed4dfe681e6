// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests against the real `stepd` binary: daemon socket
//! protocol, a full interactive launch with framed stdio, and the
//! exec-failure path.

// Test code is exempt from the workspace unwrap/panic lints
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use stepd_daemon::protocol::{ClientMsg, LaunchRequest, Request, Response};
use stepd_core::exit::WaitCode;
use stepd_core::{ClientEndpoint, ResourceLimits, StepFlavor, UserIdentity};
use stepd_wire::{FrameHeader, FrameKind, SessionHeader, FRAME_HEADER_LEN, SESSION_HEADER_LEN};

const BIN: &str = env!("CARGO_BIN_EXE_stepd");

struct Daemon {
    child: Child,
    socket: PathBuf,
    _dir: tempfile::TempDir,
}

impl Daemon {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("stepd.sock");
        let config_path = dir.path().join("stepd.toml");
        std::fs::write(
            &config_path,
            format!(
                "node_name = \"testnode\"\nspool_dir = \"{}\"\n",
                dir.path().join("spool").display()
            ),
        )
        .unwrap();

        let child = Command::new(BIN)
            .arg("run")
            .arg("--config")
            .arg(&config_path)
            .arg("--socket")
            .arg(&socket)
            .env("STEPD_LOG", "debug")
            .spawn()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while !socket.exists() {
            assert!(Instant::now() < deadline, "daemon did not come up");
            std::thread::sleep(Duration::from_millis(25));
        }

        Self { child, socket, _dir: dir }
    }

    fn request(&self, request: &Request) -> Response {
        let mut stream = UnixStream::connect(&self.socket).unwrap();
        let body = serde_json::to_vec(request).unwrap();
        stream.write_all(&(body.len() as u32).to_be_bytes()).unwrap();
        stream.write_all(&body).unwrap();

        let mut len = [0u8; 4];
        stream.read_exact(&mut len).unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut body).unwrap();
        serde_json::from_slice(&body).unwrap()
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        // best-effort shutdown; the daemon may already be gone
        if let Ok(mut stream) = UnixStream::connect(&self.socket) {
            let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
            if let Ok(body) = serde_json::to_vec(&Request::Shutdown) {
                let _ = stream.write_all(&(body.len() as u32).to_be_bytes());
                let _ = stream.write_all(&body);
                let mut ack = [0u8; 4];
                let _ = stream.read_exact(&mut ack);
            }
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break,
                _ if Instant::now() > deadline => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    break;
                }
                _ => std::thread::sleep(Duration::from_millis(25)),
            }
        }
    }
}

fn identity() -> UserIdentity {
    UserIdentity::new(nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw(), "tester")
        .with_groups(vec![nix::unistd::getgid().as_raw()])
}

fn launch_request(job_id: u32, ntasks: u32, argv: &[&str]) -> LaunchRequest {
    LaunchRequest {
        job_id,
        step_id: 0,
        flavor: StepFlavor::Interactive,
        node_index: 0,
        node_count: 1,
        total_tasks: ntasks,
        cpus_on_node: ntasks,
        node_list: "testnode".to_string(),
        cpu_groups: vec![(ntasks, 1)],
        global_task_ids: (0..ntasks).collect(),
        identity: identity(),
        cwd: "/tmp".into(),
        env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        argv: argv.iter().map(|s| s.to_string()).collect(),
        limits: ResourceLimits::new(),
        clients: vec![],
        parallel_debug: false,
        partition_id: None,
        script: None,
    }
}

fn read_exact_timeout(stream: &mut std::net::TcpStream, buf: &mut [u8]) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(20))).unwrap();
    stream.read_exact(buf)
}

fn read_frame(stream: &mut std::net::TcpStream) -> (FrameHeader, Vec<u8>) {
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    read_exact_timeout(stream, &mut hdr).unwrap();
    let header = FrameHeader::decode(&hdr).unwrap();
    let mut payload = vec![0u8; header.length as usize];
    read_exact_timeout(stream, &mut payload).unwrap();
    (header, payload)
}

/// Accept one notification connection and decode its message.
fn read_notification(listener: &TcpListener) -> ClientMsg {
    listener.set_nonblocking(false).unwrap();
    let (mut conn, _) = listener.accept().unwrap();
    let mut len = [0u8; 4];
    conn.read_exact(&mut len).unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    conn.read_exact(&mut body).unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[test]
fn ping_status_shutdown() {
    let daemon = Daemon::start();
    assert_eq!(daemon.request(&Request::Ping), Response::Pong);
    match daemon.request(&Request::Status) {
        Response::Status { steps } => assert!(steps.is_empty()),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn interactive_launch_routes_stdio_and_exits() {
    let daemon = Daemon::start();

    let io_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let resp_listener = TcpListener::bind("127.0.0.1:0").unwrap();

    let key: Vec<u8> = (0..128u32).map(|i| i as u8).collect();
    let mut request = launch_request(100, 1, &["/bin/sh", "-c", "echo hello"]);
    request.clients.push(ClientEndpoint::new(
        Some(io_listener.local_addr().unwrap()),
        Some(resp_listener.local_addr().unwrap()),
        key.clone(),
    ));

    match daemon.request(&Request::Launch { request: Box::new(request) }) {
        Response::Launched { job_id: 100, step_id: 0 } => {}
        other => panic!("unexpected: {:?}", other),
    }

    // the launcher connects back and sends the session header first
    let (mut io_conn, _) = io_listener.accept().unwrap();
    let mut hdr = [0u8; SESSION_HEADER_LEN];
    read_exact_timeout(&mut io_conn, &mut hdr).unwrap();
    let session = SessionHeader::decode(&hdr).unwrap();
    session.verify(&key).unwrap();
    assert_eq!(session.node_index, 0);

    // launch response carries one real pid
    match read_notification(&resp_listener) {
        ClientMsg::LaunchResult { return_code, pids, node_name, .. } => {
            assert_eq!(return_code, 0);
            assert_eq!(node_name, "testnode");
            assert_eq!(pids.len(), 1);
            assert!(pids[0] > 0);
        }
        other => panic!("unexpected: {:?}", other),
    }

    // framed stdout then EOFs for both streams
    let mut stdout = Vec::new();
    let mut eofs = Vec::new();
    while eofs.len() < 2 {
        let (header, payload) = read_frame(&mut io_conn);
        if header.is_eof() {
            eofs.push(header.kind);
        } else if header.kind == FrameKind::Stdout {
            stdout.extend_from_slice(&payload);
        }
    }
    assert_eq!(stdout, b"hello\n");
    assert!(eofs.contains(&FrameKind::Stdout));
    assert!(eofs.contains(&FrameKind::Stderr));

    // aggregated task exit with a clean status
    match read_notification(&resp_listener) {
        ClientMsg::TaskExited { task_ids, status } => {
            assert_eq!(task_ids, vec![0]);
            assert_eq!(WaitCode::from_raw(status), WaitCode::Exited(0));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn exec_failure_reports_the_tasks_errno() {
    let daemon = Daemon::start();

    let resp_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut request = launch_request(101, 1, &["/no/such/binary"]);
    request.clients.push(ClientEndpoint::new(
        None,
        Some(resp_listener.local_addr().unwrap()),
        vec![0u8; 128],
    ));

    match daemon.request(&Request::Launch { request: Box::new(request) }) {
        Response::Launched { .. } => {}
        other => panic!("unexpected: {:?}", other),
    }

    match read_notification(&resp_listener) {
        ClientMsg::LaunchResult { return_code, .. } => assert_eq!(return_code, 0),
        other => panic!("unexpected: {:?}", other),
    }
    match read_notification(&resp_listener) {
        ClientMsg::TaskExited { task_ids, status } => {
            assert_eq!(task_ids, vec![0]);
            assert_eq!(WaitCode::from_raw(status), WaitCode::Exited(nix::libc::ENOENT));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn late_client_attaches_through_the_attach_request() {
    let daemon = Daemon::start();

    // step with no client at launch; output goes to the replay window
    let mut request = launch_request(103, 1, &["/bin/sh", "-c", "echo early; sleep 2; echo late"]);
    request.clients.clear();
    match daemon.request(&Request::Launch { request: Box::new(request) }) {
        Response::Launched { .. } => {}
        other => panic!("unexpected: {:?}", other),
    }

    std::thread::sleep(Duration::from_millis(700));

    let io_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let key: Vec<u8> = vec![7u8; 128];
    let attach = Request::Attach {
        job_id: 103,
        step_id: 0,
        client: ClientEndpoint::new(Some(io_listener.local_addr().unwrap()), None, key.clone()),
    };
    assert_eq!(daemon.request(&attach), Response::Ok);

    let (mut io_conn, _) = io_listener.accept().unwrap();
    let mut hdr = [0u8; SESSION_HEADER_LEN];
    read_exact_timeout(&mut io_conn, &mut hdr).unwrap();
    SessionHeader::decode(&hdr).unwrap().verify(&key).unwrap();

    let mut stdout = Vec::new();
    let mut eofs = 0;
    while eofs < 2 {
        let (header, payload) = read_frame(&mut io_conn);
        if header.is_eof() {
            eofs += 1;
        } else if header.kind == FrameKind::Stdout {
            stdout.extend_from_slice(&payload);
        }
    }
    assert_eq!(stdout, b"early\nlate\n");
}

#[test]
fn batch_launch_over_the_socket_reports_step_complete() {
    let dir = tempfile::tempdir().unwrap();
    let controller = TcpListener::bind("127.0.0.1:0").unwrap();

    let socket = dir.path().join("stepd.sock");
    let config_path = dir.path().join("stepd.toml");
    std::fs::write(
        &config_path,
        format!(
            "node_name = \"batchnode\"\nspool_dir = \"{}\"\ncontroller_addr = \"{}\"\n",
            dir.path().join("spool").display(),
            controller.local_addr().unwrap(),
        ),
    )
    .unwrap();

    let child = Command::new(BIN)
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .arg("--socket")
        .arg(&socket)
        .spawn()
        .unwrap();
    let daemon = Daemon { child, socket, _dir: dir };
    let deadline = Instant::now() + Duration::from_secs(10);
    while !daemon.socket.exists() {
        assert!(Instant::now() < deadline, "daemon did not come up");
        std::thread::sleep(Duration::from_millis(25));
    }

    let mut request = launch_request(44, 1, &["/bin/sh"]);
    request.flavor = StepFlavor::Batch;
    request.step_id = u32::MAX;
    request.script = Some("#!/bin/sh\nexit 3\n".to_string());

    match daemon.request(&Request::Launch { request: Box::new(request) }) {
        Response::Launched { job_id: 44, .. } => {}
        other => panic!("unexpected: {:?}", other),
    }

    // the controller hears about completion with the script's status
    let (mut conn, _) = controller.accept().unwrap();
    let mut len = [0u8; 4];
    conn.read_exact(&mut len).unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    conn.read_exact(&mut body).unwrap();
    let msg: stepd_daemon::protocol::ControllerMsg = serde_json::from_slice(&body).unwrap();
    let stepd_daemon::protocol::ControllerMsg::StepComplete {
        job_id,
        node_name,
        step_rc,
        task_rc,
    } = msg;
    assert_eq!(job_id, 44);
    assert_eq!(node_name, "batchnode");
    assert_eq!(step_rc, 0);
    assert_eq!(WaitCode::from_raw(task_rc), WaitCode::Exited(3));

    // spool removed on completion
    assert!(!daemon._dir.path().join("spool").join("job00044").exists());
}

#[test]
fn duplicate_launch_is_refused_while_the_first_runs() {
    let daemon = Daemon::start();

    let resp_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut request = launch_request(102, 1, &["/bin/sh", "-c", "sleep 5"]);
    request.clients.push(ClientEndpoint::new(
        None,
        Some(resp_listener.local_addr().unwrap()),
        vec![0u8; 128],
    ));

    match daemon.request(&Request::Launch { request: Box::new(request.clone()) }) {
        Response::Launched { .. } => {}
        other => panic!("unexpected: {:?}", other),
    }
    // wait for the first launch to be underway
    match read_notification(&resp_listener) {
        ClientMsg::LaunchResult { return_code: 0, .. } => {}
        other => panic!("unexpected: {:?}", other),
    }

    let retry_resp = TcpListener::bind("127.0.0.1:0").unwrap();
    request.clients[0].resp_addr = Some(retry_resp.local_addr().unwrap());
    match daemon.request(&Request::Launch { request: Box::new(request) }) {
        Response::Launched { .. } => {}
        other => panic!("unexpected: {:?}", other),
    }
    match read_notification(&retry_resp) {
        ClientMsg::LaunchResult { return_code, pids, .. } => {
            assert_ne!(return_code, 0);
            assert!(pids.is_empty());
        }
        other => panic!("unexpected: {:?}", other),
    }
}
