/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Bridge from simulated placements to real containers.
//!
//! These functions are the only place the scheduler spawns or removes
//! containers.  Every status change goes through the [`StateStore`] so the
//! records stay the source of truth.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use super::error::{SchedulerError, StartOutcome};
use crate::backend::{Backend, BackendError, ServiceInstance};
use crate::model::{BackendStatus, Execution, ExecutionId, Service, ServiceId, ServiceStatus};
use crate::state::StateStore;

/// Collaborators needed to act on the real cluster.
#[derive(Clone, Copy)]
pub struct Launcher<'a> {
    pub store: &'a dyn StateStore,
    pub backend: &'a dyn Backend,
    pub deployment: &'a str,
}

impl<'a> Launcher<'a> {
    /// Start every essential service of `execution` that is not running yet,
    /// in ascending `startup_order`.
    ///
    /// On `Retry` / `Fatal` the caller is responsible for tearing down what
    /// was started; see [`teardown_services`](Self::teardown_services).
    pub async fn start_essential(
        &self,
        execution: &Execution,
        allocation: &BTreeMap<ServiceId, String>,
    ) -> Result<StartOutcome, SchedulerError> {
        debug!(execution = execution.id, "starting essential services");
        self.store.set_starting(execution.id)?;

        let mut pending: Vec<&Service> = execution
            .essential_services()
            .filter(|s| !s.is_placed_and_alive())
            .collect();
        pending.sort_by_key(|s| s.startup_order);

        for service in pending {
            if service.placement.is_some() {
                // Dead container left from an earlier start.
                self.teardown_service(service).await?;
            }
            self.store.set_service_starting(service.id)?;
            let hint = allocation.get(&service.id).cloned();
            let instance = match ServiceInstance::new(execution, service, self.deployment, hint) {
                Ok(i) => i,
                Err(e) => {
                    let msg = e.to_string();
                    error!(execution = execution.id, service = %service.name, error = %msg, "cannot build service instance");
                    self.store.set_service_error(service.id, &msg)?;
                    return Ok(StartOutcome::Fatal(msg));
                }
            };

            match self.backend.spawn_service(&instance).await {
                Ok(placement) => {
                    debug!(
                        execution = execution.id,
                        service = %service.name,
                        node = %placement.backend_host,
                        "essential service started"
                    );
                    self.store.set_service_active(service.id, placement)?;
                }
                Err(err) => {
                    let outcome = StartOutcome::from(err.clone());
                    match &outcome {
                        StartOutcome::Fatal(msg) => {
                            error!(execution = execution.id, service = %service.name, error = %err, "fatal error starting service");
                            self.store.set_service_error(service.id, msg)?;
                        }
                        _ => {
                            warn!(execution = execution.id, service = %service.name, error = %err, "temporary failure starting service");
                            self.store.set_service_inactive(service.id)?;
                        }
                    }
                    return Ok(outcome);
                }
            }
        }
        Ok(StartOutcome::Ok)
    }

    /// Start the elastic services the simulation placed.
    ///
    /// Failures stay local to the service: transient ones leave it inactive
    /// for a later pass, fatal ones park it in `error`.  Returns how many
    /// services were started.
    pub async fn start_elastic(
        &self,
        execution: &Execution,
        allocation: &BTreeMap<ServiceId, String>,
    ) -> Result<usize, SchedulerError> {
        let mut runnable: Vec<&Service> = execution
            .elastic_services()
            .filter(|s| {
                !s.is_active() && s.status != ServiceStatus::Error && allocation.contains_key(&s.id)
            })
            .collect();
        runnable.sort_by_key(|s| s.startup_order);

        let mut started = 0;
        for service in runnable {
            self.store.set_service_starting(service.id)?;
            let hint = allocation.get(&service.id).cloned();
            let result = match ServiceInstance::new(execution, service, self.deployment, hint) {
                Ok(instance) => self.backend.spawn_service(&instance).await,
                Err(e) => Err(BackendError::Fatal(e.to_string())),
            };
            match result {
                Ok(placement) => {
                    self.store.set_service_active(service.id, placement)?;
                    started += 1;
                }
                Err(BackendError::Fatal(msg)) => {
                    warn!(execution = execution.id, service = %service.name, error = %msg, "elastic service failed permanently");
                    self.store.set_service_error(service.id, &msg)?;
                }
                Err(err) => {
                    debug!(execution = execution.id, service = %service.name, error = %err, "elastic service not started");
                    self.store.set_service_inactive(service.id)?;
                }
            }
        }
        if started > 0 {
            debug!(execution = execution.id, started, "elastic services started");
        }
        Ok(started)
    }

    /// Remove every container of `execution` that has a placement.
    ///
    /// Backend errors are logged and do not stop the teardown.
    pub async fn teardown_services(&self, execution: &Execution) -> Result<(), SchedulerError> {
        for service in execution.services.iter().filter(|s| s.placement.is_some()) {
            self.teardown_service(service).await?;
        }
        Ok(())
    }

    /// Remove one container and mark the service inactive.
    pub async fn teardown_service(&self, service: &Service) -> Result<(), SchedulerError> {
        self.store.set_service_terminating(service.id)?;
        if let Err(err) = self.backend.terminate_service(service).await {
            warn!(service = service.id, error = %err, "backend failed to remove container");
        }
        self.store.set_service_inactive(service.id)?;
        self.store
            .set_backend_status(service.id, BackendStatus::Destroyed)?;
        debug!(service = %service.name, "service terminated");
        Ok(())
    }

    /// Full termination of one execution: remove all containers, then mark
    /// it `terminated` with `reason` as its message.
    pub async fn terminate_execution(
        &self,
        id: ExecutionId,
        reason: Option<&str>,
    ) -> Result<(), SchedulerError> {
        self.store.set_cleaning_up(id)?;
        let execution = self.store.execution(id)?;
        self.teardown_services(&execution).await?;
        self.store.set_terminated(id, reason)?;
        info!(execution = id, reason = reason.unwrap_or("-"), "execution terminated");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
