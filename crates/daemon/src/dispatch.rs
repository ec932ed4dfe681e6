// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launch dispatch: one entry point per launch flavor.
//!
//! Builds the step descriptor from the controller's request, prepares
//! batch spool state, and runs the job manager on a dedicated thread,
//! one thread per step, alive for the step's whole lifetime. Batch steps
//! report completion to the controller afterwards.

use crate::batch;
use crate::config::Config;
use crate::manager::StepRun;
use crate::protocol::{notify_endpoint, ControllerMsg, LaunchRequest};
use crate::registry::{RegistryError, StepRegistry};
use crate::script::run_script;
use std::sync::Arc;
use std::time::Duration;
use stepd_core::{ClientEndpoint, StepDescriptor, StepFlavor, StepKey};
use stepd_session::Interconnect;

const CONTROLLER_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared launch front end handed to every listener connection.
#[derive(Clone)]
pub struct Dispatcher {
    pub config: Arc<Config>,
    pub registry: Arc<StepRegistry>,
    pub interconnect: Arc<dyn Interconnect>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<StepRegistry>,
        interconnect: Arc<dyn Interconnect>,
    ) -> Self {
        Self { config, registry, interconnect }
    }

    /// Validate a launch request and start its job manager.
    ///
    /// Returns as soon as the step thread is running; launch results and
    /// exits reach clients through their own endpoints.
    pub fn launch(
        &self,
        request: LaunchRequest,
        peer_host: Option<String>,
    ) -> Result<StepKey, String> {
        if request.flavor == StepFlavor::Batch && request.script.is_none() {
            return Err("batch launch without a script".to_string());
        }
        if request.global_task_ids.is_empty() {
            return Err("launch request with no tasks".to_string());
        }

        let script = request.script.clone();
        let desc = request.into_descriptor(peer_host);
        desc.validate()?;
        let key = desc.key;

        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);
        let interconnect = Arc::clone(&self.interconnect);

        std::thread::Builder::new()
            .name(format!("step-{}", key))
            .spawn(move || run_step_thread(&config, &registry, interconnect.as_ref(), desc, script))
            .map_err(|e| format!("could not start step thread: {}", e))?;

        Ok(key)
    }

    /// Route an attach request to a running step.
    pub fn attach(
        &self,
        job_id: u32,
        step_id: u32,
        client: ClientEndpoint,
    ) -> Result<(), RegistryError> {
        self.registry.attach(&StepKey::new(job_id, step_id), client)
    }
}

fn run_step_thread(
    config: &Config,
    registry: &StepRegistry,
    interconnect: &dyn Interconnect,
    mut desc: StepDescriptor,
    script: Option<String>,
) {
    let key = desc.key;
    let is_batch = desc.is_batch();

    let mut spool = None;
    if is_batch {
        if let Some(prolog) = &config.prolog {
            match run_script("prolog", prolog, key.job_id, desc.identity.uid, desc.partition_id.as_deref())
            {
                Ok(0) => {}
                Ok(rc) => tracing::error!("prolog exited {}", rc),
                Err(e) => tracing::error!("prolog: {}", e),
            }
        }

        let body = script.unwrap_or_default();
        match batch::create_spool(
            &config.spool_dir,
            key.job_id,
            &body,
            desc.identity.uid,
            desc.identity.gid,
        ) {
            Ok(entry) => {
                desc.argv = vec![entry.script.display().to_string()];
                spool = Some(entry);
            }
            Err(e) => {
                tracing::error!("batch spool: {}", e);
                complete_step(config, key, stepd_core::StepResult::IoSetup.code(), 0);
                return;
            }
        }
    }

    let outcome = StepRun { config, registry, interconnect }.run(desc.clone());
    tracing::info!(
        rc = %outcome.rc,
        task_rc = outcome.task_rc,
        "step {} completed",
        key
    );

    if let Some(entry) = spool {
        batch::remove_spool(&entry);
    }

    if is_batch {
        if let Some(epilog) = &config.epilog {
            match run_script("epilog", epilog, key.job_id, desc.identity.uid, desc.partition_id.as_deref())
            {
                Ok(0) => {}
                Ok(rc) => tracing::error!("epilog exited {}", rc),
                Err(e) => tracing::error!("epilog: {}", e),
            }
        }
        complete_step(config, key, outcome.rc.code(), outcome.task_rc);
    }
}

/// Tell the controller a batch step is done on this node.
fn complete_step(config: &Config, key: StepKey, step_rc: i32, task_rc: i32) {
    let Some(addr) = config.controller_addr else { return };
    let msg = ControllerMsg::StepComplete {
        job_id: key.job_id,
        node_name: config.node_name.clone(),
        step_rc,
        task_rc,
    };
    if let Err(e) = notify_endpoint(addr, &msg, CONTROLLER_TIMEOUT) {
        tracing::error!("unable to send job complete message: {}", e);
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
