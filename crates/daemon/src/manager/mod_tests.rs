// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job-manager orchestration against scripted session managers.
//!
//! These tests stand in a shell script for the `session-manager`
//! subcommand: it consumes the descriptor on stdin and speaks the
//! control-pipe protocol on fd 3. The real child is exercised by the
//! binary end-to-end tests.

use super::*;
use crate::config::Config;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use stepd_core::test_support::descriptor;
use stepd_session::NullInterconnect;

fn fake_smgr(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("smgr");
    std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config_with_helper(helper: std::path::PathBuf) -> Config {
    Config { session_helper: Some(helper), ..Config::default() }
}

struct Fixture {
    config: Config,
    registry: StepRegistry,
    _dir: tempfile::TempDir,
}

impl Fixture {
    fn new(smgr_body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let helper = fake_smgr(dir.path(), smgr_body);
        Self { config: config_with_helper(helper), registry: StepRegistry::new(16), _dir: dir }
    }

    fn run(&self, desc: stepd_core::StepDescriptor) -> StepOutcome {
        let run = StepRun {
            config: &self.config,
            registry: &self.registry,
            interconnect: &NullInterconnect,
        };
        run.run(desc)
    }
}

// pid record: 'A' = 65 little-endian; exit record: task 0, status 0
const HAPPY_SMGR: &str = "printf 'A\\000\\000\\000' >&3\n\
                          printf '\\000\\000\\000\\000\\000\\000\\000\\000' >&3\n\
                          exit 0";

#[test]
fn successful_step_reports_success_and_clears_registry() {
    let fx = Fixture::new(HAPPY_SMGR);
    let outcome = fx.run(descriptor(10, 0, 1, &["/bin/true"]));

    assert_eq!(outcome.rc, stepd_core::StepResult::Success);
    assert_eq!(outcome.task_rc, 0);
    assert!(fx.registry.is_empty());
}

#[test]
fn uid_failure_exit_code_maps_to_step_result() {
    let fx = Fixture::new("exit 2");
    let outcome = fx.run(descriptor(11, 0, 1, &["/bin/true"]));
    assert_eq!(outcome.rc, stepd_core::StepResult::UidGidError);
}

#[test]
fn interconnect_failure_exit_code_maps_to_step_result() {
    let fx = Fixture::new("exit 1");
    let outcome = fx.run(descriptor(12, 0, 1, &["/bin/true"]));
    assert_eq!(outcome.rc, stepd_core::StepResult::InterconnectFailure);
}

#[test]
fn killed_session_manager_maps_to_session_killed() {
    let fx = Fixture::new("kill -9 $$");
    let outcome = fx.run(descriptor(13, 0, 1, &["/bin/true"]));
    assert_eq!(outcome.rc, stepd_core::StepResult::SessionManagerKilled);
    assert!(fx.registry.is_empty());
}

#[test]
fn duplicate_step_is_refused() {
    let fx = Fixture::new(HAPPY_SMGR);
    let desc = descriptor(14, 0, 1, &["/bin/true"]);
    let _held = fx.registry.insert(desc.key, 1).unwrap();

    let outcome = fx.run(desc);
    assert_eq!(outcome.rc, stepd_core::StepResult::StepExists);
    // the original record survives the refused launch
    assert!(fx.registry.contains(&stepd_core::StepKey::new(14, 0)));
}

#[test]
fn batch_step_rc_is_launcher_success_with_task_status() {
    // exit record carries status 0x0200 (task exited 2): \000\000\000\000 then 00 02 00 00 LE
    let body = "printf 'A\\000\\000\\000' >&3\n\
                printf '\\000\\000\\000\\000\\000\\002\\000\\000' >&3\n\
                exit 0";
    let fx = Fixture::new(body);
    let mut desc = descriptor(15, 0, 1, &["/bin/sh"]);
    desc.flavor = stepd_core::StepFlavor::Batch;
    desc.key = stepd_core::StepKey::batch(15);

    let outcome = fx.run(desc);
    assert_eq!(outcome.rc, stepd_core::StepResult::Success);
    assert_eq!(
        stepd_core::exit::WaitCode::from_raw(outcome.task_rc),
        stepd_core::exit::WaitCode::Exited(2)
    );
}

#[test]
fn session_result_table_is_faithful() {
    use stepd_core::StepResult;
    assert_eq!(session_result(WaitCode::raw_exit(0)), StepResult::Success);
    assert_eq!(session_result(WaitCode::raw_exit(3)), StepResult::SetsidError);
    assert_eq!(session_result(WaitCode::raw_exit(4)), StepResult::ChdirError);
    assert_eq!(session_result(WaitCode::raw_exit(6)), StepResult::ExecFailed);
    assert_eq!(session_result(WaitCode::raw_signal(11)), StepResult::SessionManagerKilled);
    assert_eq!(session_result(WaitCode::raw_exit(102)), StepResult::Raw(102));
}
