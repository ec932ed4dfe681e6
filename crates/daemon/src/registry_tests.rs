// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step registry semantics: uniqueness, capacity, attach routing.

use super::*;
use std::os::fd::AsRawFd;

fn endpoint() -> ClientEndpoint {
    ClientEndpoint::new(None, None, vec![0u8; 128])
}

#[test]
fn duplicate_key_is_refused() {
    let reg = StepRegistry::new(8);
    let key = StepKey::new(1, 0);
    let _chan = reg.insert(key, 2).unwrap();
    assert_eq!(reg.insert(key, 2).unwrap_err(), RegistryError::Exists);
}

#[test]
fn capacity_is_enforced() {
    let reg = StepRegistry::new(1);
    let _chan = reg.insert(StepKey::new(1, 0), 1).unwrap();
    assert_eq!(reg.insert(StepKey::new(2, 0), 1).unwrap_err(), RegistryError::Full);
}

#[test]
fn removal_frees_the_key() {
    let reg = StepRegistry::new(8);
    let key = StepKey::new(1, 0);
    let _chan = reg.insert(key, 1).unwrap();
    reg.remove(&key);
    assert!(!reg.contains(&key));
    assert!(reg.insert(key, 1).is_ok());
}

#[test]
fn attach_delivers_endpoint_and_wake_byte() {
    let reg = StepRegistry::new(8);
    let key = StepKey::new(3, 1);
    let chan = reg.insert(key, 1).unwrap();

    reg.attach(&key, endpoint()).unwrap();

    let delivered = chan.rx.try_recv().unwrap();
    assert_eq!(delivered, endpoint());

    let mut buf = [0u8; 8];
    let n = nix::unistd::read(chan.pipe_rd.as_raw_fd(), &mut buf).unwrap();
    assert_eq!(n, 1);
}

#[test]
fn attach_to_unknown_step_fails() {
    let reg = StepRegistry::new(8);
    assert_eq!(
        reg.attach(&StepKey::new(9, 9), endpoint()).unwrap_err(),
        RegistryError::NotFound
    );
}

#[test]
fn snapshot_reports_state_transitions() {
    let reg = StepRegistry::new(8);
    let key = StepKey::new(5, 2);
    let _chan = reg.insert(key, 4).unwrap();
    reg.set_state(&key, StepState::Started);
    reg.set_session_pid(&key, 4242);

    let snap = reg.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].job_id, 5);
    assert_eq!(snap[0].state, "started");
    assert_eq!(snap[0].session_pid, Some(4242));
    assert_eq!(snap[0].ntasks, 4);
}
