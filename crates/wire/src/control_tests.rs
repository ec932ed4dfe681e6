// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-pipe record layout.

use super::*;

#[test]
fn pid_record_round_trips() {
    let rec = PidRecord(12345);
    assert_eq!(PidRecord::decode(&rec.encode()).unwrap(), rec);
}

#[test]
fn pid_record_is_pid_sized() {
    assert_eq!(PID_RECORD_LEN, std::mem::size_of::<i32>());
}

#[test]
fn exit_record_round_trips() {
    let rec = ExitRecord::new(3, 0x0200);
    assert_eq!(ExitRecord::decode(&rec.encode()).unwrap(), rec);
}

#[test]
fn exit_record_carries_signal_statuses() {
    // killed by SIGKILL: raw status 9
    let rec = ExitRecord::new(0, 9);
    let back = ExitRecord::decode(&rec.encode()).unwrap();
    assert_eq!(back.status, 9);
}

#[test]
fn short_buffers_are_rejected() {
    assert!(PidRecord::decode(&[0u8; 2]).is_err());
    assert!(ExitRecord::decode(&[0u8; 7]).is_err());
}
