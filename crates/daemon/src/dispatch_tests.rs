// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launch dispatch: validation, step threads, batch completion RPC.

use super::*;
use crate::protocol::LaunchRequest;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use stepd_core::{ResourceLimits, UserIdentity};
use stepd_session::NullInterconnect;

fn fake_smgr(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("smgr");
    // one pid record, one clean exit record
    let body = "#!/bin/sh\ncat > /dev/null\n\
                printf 'A\\000\\000\\000' >&3\n\
                printf '\\000\\000\\000\\000\\000\\000\\000\\000' >&3\n\
                exit 0\n";
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn request(job_id: u32, flavor: stepd_core::StepFlavor) -> LaunchRequest {
    LaunchRequest {
        job_id,
        step_id: 0,
        flavor,
        node_index: 0,
        node_count: 1,
        total_tasks: 1,
        cpus_on_node: 1,
        node_list: "localhost".to_string(),
        cpu_groups: vec![(1, 1)],
        global_task_ids: vec![0],
        identity: UserIdentity::new(
            nix::unistd::getuid().as_raw(),
            nix::unistd::getgid().as_raw(),
            "tester",
        ),
        cwd: "/tmp".into(),
        env: vec![],
        argv: vec!["/bin/true".to_string()],
        limits: ResourceLimits::new(),
        clients: vec![],
        parallel_debug: false,
        partition_id: None,
        script: None,
    }
}

fn dispatcher(dir: &std::path::Path) -> Dispatcher {
    let config = Config {
        session_helper: Some(fake_smgr(dir)),
        spool_dir: dir.join("spool"),
        ..Config::default()
    };
    Dispatcher::new(
        Arc::new(config),
        Arc::new(StepRegistry::new(16)),
        Arc::new(NullInterconnect),
    )
}

fn wait_until_idle(registry: &StepRegistry) {
    for _ in 0..200 {
        if registry.is_empty() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(25));
    }
    panic!("step did not finish");
}

#[test]
fn batch_launch_without_script_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(dir.path());
    let err = d.launch(request(1, stepd_core::StepFlavor::Batch), None).unwrap_err();
    assert!(err.contains("script"), "{err}");
}

#[test]
fn launch_without_tasks_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(dir.path());
    let mut req = request(2, stepd_core::StepFlavor::Interactive);
    req.global_task_ids.clear();
    assert!(d.launch(req, None).is_err());
}

#[test]
fn launch_runs_a_step_thread_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(dir.path());

    let key = d.launch(request(3, stepd_core::StepFlavor::Interactive), None).unwrap();
    assert_eq!(key, stepd_core::StepKey::new(3, 0));

    wait_until_idle(&d.registry);
}

#[test]
fn batch_launch_reports_completion_to_the_controller() {
    let dir = tempfile::tempdir().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut d = dispatcher(dir.path());
    let mut config = (*d.config).clone();
    config.controller_addr = Some(addr);
    d.config = Arc::new(config);

    let mut req = request(42, stepd_core::StepFlavor::Batch);
    req.step_id = stepd_core::step::NO_STEP;
    req.script = Some("#!/bin/sh\nexit 0\n".to_string());
    d.launch(req, None).unwrap();

    let (mut conn, _) = listener.accept().unwrap();
    let mut len = [0u8; 4];
    conn.read_exact(&mut len).unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    conn.read_exact(&mut body).unwrap();

    let msg: ControllerMsg = crate::protocol::decode(&body).unwrap();
    let ControllerMsg::StepComplete { job_id, step_rc, .. } = msg;
    assert_eq!(job_id, 42);
    assert_eq!(step_rc, 0);

    // the spool entry is gone after completion
    assert!(!dir.path().join("spool").join("job00042").exists());
    wait_until_idle(&d.registry);
}
