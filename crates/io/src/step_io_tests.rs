// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end engine scenarios over real pipes and socketpairs.

use super::*;
use crate::pipes::TaskPipes;
use crate::thread::IoThread;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use stepd_wire::{FrameHeader, FrameKind, FRAME_HEADER_LEN, MAX_PAYLOAD};

/// Child-side pipe ends the test keeps to play the task.
struct FakeTask {
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
}

fn wire_tasks(n: u16) -> (Vec<TaskIoFds>, Vec<FakeTask>) {
    let mut fds = Vec::new();
    let mut fakes = Vec::new();
    for i in 0..n {
        let p = TaskPipes::create().unwrap();
        fds.push(TaskIoFds {
            local_id: i,
            global_id: u32::from(i),
            stdin_wr: p.stdin_wr,
            stdout_rd: p.stdout_rd,
            stderr_rd: p.stderr_rd,
        });
        fakes.push(FakeTask { stdin: p.child_stdin, stdout: p.child_stdout, stderr: p.child_stderr });
    }
    (fds, fakes)
}

fn read_frame(sock: &mut UnixStream) -> Option<(FrameHeader, Vec<u8>)> {
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    let mut got = 0;
    while got < hdr.len() {
        match sock.read(&mut hdr[got..]) {
            Ok(0) => return None,
            Ok(n) => got += n,
            Err(_) => return None,
        }
    }
    let header = FrameHeader::decode(&hdr).unwrap();
    let mut payload = vec![0u8; header.length as usize];
    let mut got = 0;
    while got < payload.len() {
        match sock.read(&mut payload[got..]) {
            Ok(0) => return None,
            Ok(n) => got += n,
            Err(_) => return None,
        }
    }
    Some((header, payload))
}

fn send_frame(sock: &mut UnixStream, kind: FrameKind, gtid: u32, payload: &[u8]) {
    let hdr = FrameHeader::new(kind, 0, gtid, payload.len() as u32);
    sock.write_all(&hdr.encode()).unwrap();
    sock.write_all(payload).unwrap();
    sock.flush().unwrap();
}

fn write_fd(fd: &OwnedFd, bytes: &[u8]) {
    use std::os::fd::AsFd;
    stepd_sys::write_all(fd.as_fd(), bytes).unwrap();
}

#[test]
fn echo_fan_out_two_tasks() {
    let (fds, mut fakes) = wire_tasks(2);
    let io = IoThread::spawn(fds).unwrap();

    let (theirs, mut ours) = UnixStream::pair().unwrap();
    io.add_client(theirs.into(), false).unwrap();

    write_fd(&fakes[0].stdout, b"ab\n");
    write_fd(&fakes[1].stdout, b"cd\n");

    // tasks exit: every child end closes
    fakes.clear();
    io.shutdown();

    let mut payloads = Vec::new();
    let mut eofs = Vec::new();
    while let Some((hdr, payload)) = read_frame(&mut ours) {
        if hdr.is_eof() {
            eofs.push((hdr.kind, hdr.global_task));
        } else {
            payloads.push((hdr.kind, hdr.global_task, payload));
        }
    }

    assert!(payloads.contains(&(FrameKind::Stdout, 0, b"ab\n".to_vec())));
    assert!(payloads.contains(&(FrameKind::Stdout, 1, b"cd\n".to_vec())));
    assert_eq!(payloads.len(), 2);

    // two length-0 stdout frames and two length-0 stderr frames
    assert_eq!(eofs.iter().filter(|(k, _)| *k == FrameKind::Stdout).count(), 2);
    assert_eq!(eofs.iter().filter(|(k, _)| *k == FrameKind::Stderr).count(), 2);

    io.join().unwrap();
}

#[test]
fn per_task_output_order_is_preserved() {
    let (fds, mut fakes) = wire_tasks(1);
    let io = IoThread::spawn(fds).unwrap();

    let (theirs, mut ours) = UnixStream::pair().unwrap();
    io.add_client(theirs.into(), false).unwrap();

    write_fd(&fakes[0].stdout, b"first\n");
    std::thread::sleep(std::time::Duration::from_millis(30));
    write_fd(&fakes[0].stdout, b"second\n");

    fakes.clear();
    io.shutdown();

    let mut seen = Vec::new();
    while let Some((hdr, payload)) = read_frame(&mut ours) {
        if !hdr.is_eof() && hdr.kind == FrameKind::Stdout {
            seen.push(String::from_utf8(payload).unwrap());
        }
    }
    assert_eq!(seen.concat(), "first\nsecond\n");

    io.join().unwrap();
}

#[test]
fn broadcast_stdin_reaches_every_task_then_closes_once() {
    let (fds, fakes) = wire_tasks(3);
    let io = IoThread::spawn(fds).unwrap();

    let (theirs, mut ours) = UnixStream::pair().unwrap();
    io.add_client(theirs.into(), false).unwrap();

    send_frame(&mut ours, FrameKind::StdinAll, 0, b"hi");

    let mut buf = [0u8; 2];
    for fake in &fakes {
        use std::os::fd::AsRawFd;
        let n = stepd_sys::read_exact(fake.stdin.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf, b"hi");
    }

    // zero-length broadcast closes every stdin
    send_frame(&mut ours, FrameKind::StdinAll, 0, b"");
    for fake in &fakes {
        use std::os::fd::AsRawFd;
        let n = stepd_sys::read_exact(fake.stdin.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(n, 0, "stdin must be closed after the zero-length broadcast");
    }

    drop(fakes);
    io.shutdown();
    io.join().unwrap();
}

#[test]
fn targeted_stdin_reaches_only_the_addressed_task() {
    let (fds, fakes) = wire_tasks(2);
    let io = IoThread::spawn(fds).unwrap();

    let (theirs, mut ours) = UnixStream::pair().unwrap();
    io.add_client(theirs.into(), false).unwrap();

    send_frame(&mut ours, FrameKind::Stdin, 1, b"only-you");
    send_frame(&mut ours, FrameKind::Stdin, 1, b"");

    use std::os::fd::AsRawFd;
    let mut buf = [0u8; 8];
    let n = stepd_sys::read_exact(fakes[1].stdin.as_raw_fd(), &mut buf).unwrap();
    assert_eq!(&buf[..n], b"only-you");
    assert_eq!(stepd_sys::read_exact(fakes[1].stdin.as_raw_fd(), &mut buf).unwrap(), 0);

    // task 0 saw nothing and its pipe is still open: a nonblocking read
    // would block, so probe by closing from our side after shutdown
    drop(fakes);
    io.shutdown();
    io.join().unwrap();
}

#[test]
fn late_client_gets_replay_then_live_output() {
    let (fds, mut fakes) = wire_tasks(1);
    let io = IoThread::spawn(fds).unwrap();

    write_fd(&fakes[0].stdout, b"one\ntwo\nthree\n");
    // no client yet: the engine consumes these lines into the replay window
    std::thread::sleep(std::time::Duration::from_millis(50));

    let (theirs, mut ours) = UnixStream::pair().unwrap();
    io.add_client(theirs.into(), true).unwrap();

    write_fd(&fakes[0].stdout, b"live\n");
    fakes.clear();
    io.shutdown();

    let mut text = String::new();
    while let Some((hdr, payload)) = read_frame(&mut ours) {
        if !hdr.is_eof() && hdr.kind == FrameKind::Stdout {
            text.push_str(&String::from_utf8(payload).unwrap());
        }
    }
    assert_eq!(text, "one\ntwo\nthree\nlive\n");

    io.join().unwrap();
}

#[test]
fn max_payload_line_boundaries() {
    let (fds, mut fakes) = wire_tasks(1);
    let io = IoThread::spawn(fds).unwrap();

    let (theirs, mut ours) = UnixStream::pair().unwrap();
    io.add_client(theirs.into(), false).unwrap();

    // max-payload + 1 bytes with no newline: one full frame, the
    // remainder flushes at stream end
    let blob = vec![b'x'; MAX_PAYLOAD + 1];
    write_fd(&fakes[0].stdout, &blob);
    fakes.clear();
    io.shutdown();

    let mut sizes = Vec::new();
    while let Some((hdr, payload)) = read_frame(&mut ours) {
        if !hdr.is_eof() && hdr.kind == FrameKind::Stdout {
            sizes.push(payload.len());
        }
    }
    assert_eq!(sizes, vec![MAX_PAYLOAD, 1]);

    io.join().unwrap();
}

#[test]
fn file_sink_captures_stream_payload_raw() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("task0.out");
    let file = std::fs::File::create(&path).unwrap();

    let (fds, mut fakes) = wire_tasks(1);
    let io = IoThread::spawn(fds).unwrap();
    io.add_file_sink(file.into(), FrameKind::Stdout, Some(0)).unwrap();

    write_fd(&fakes[0].stdout, b"to-file\n");
    fakes.clear();
    io.shutdown();
    io.join().unwrap();

    let content = std::fs::read(&path).unwrap();
    assert_eq!(content, b"to-file\n");
}

#[test]
fn file_source_feeds_stdin_and_closes_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input");
    std::fs::write(&path, b"from-file").unwrap();

    let (fds, fakes) = wire_tasks(1);
    let io = IoThread::spawn(fds).unwrap();
    io.add_file_source(std::fs::File::open(&path).unwrap().into(), Some(0)).unwrap();

    use std::os::fd::AsRawFd;
    let mut buf = [0u8; 9];
    let n = stepd_sys::read_exact(fakes[0].stdin.as_raw_fd(), &mut buf).unwrap();
    assert_eq!(&buf[..n], b"from-file");
    assert_eq!(stepd_sys::read_exact(fakes[0].stdin.as_raw_fd(), &mut buf).unwrap(), 0);

    drop(fakes);
    io.shutdown();
    io.join().unwrap();
}

#[test]
fn client_disconnect_mid_step_is_tolerated() {
    let (fds, mut fakes) = wire_tasks(1);
    let io = IoThread::spawn(fds).unwrap();

    let (theirs, ours) = UnixStream::pair().unwrap();
    io.add_client(theirs.into(), false).unwrap();
    drop(ours);

    write_fd(&fakes[0].stdout, b"nobody listens\n");
    fakes.clear();
    io.shutdown();
    io.join().unwrap();
}

#[test]
fn engine_with_no_tasks_finishes_on_shutdown() {
    let (mut engine, _wake, tx) = StepIo::build(Vec::new()).unwrap();
    tx.send(IoCommand::Shutdown).unwrap();
    let summary = engine.run().unwrap();
    assert_eq!(summary, IoSummary::default());
    assert_eq!(engine.object_count(), 0);
}
