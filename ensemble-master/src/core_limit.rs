/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Soft CPU limit redistribution.
//!
//! Services are placed on their minimum core reservation.  Whatever a node
//! has left over is shared evenly between the services started on it, up to
//! each service's `max`.  The adjuster runs on its own timer and on explicit
//! triggers from the scheduling loop; it only touches soft limits of running
//! services, never queue membership.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError};
use crate::config::CoreLimitConfig;
use crate::model::{BackendStatus, ExecutionStatus, Service};
use crate::state::StateStore;

/// Limits closer than this are considered unchanged.
const CORE_EPSILON: f64 = 1e-6;

/// Wakes a [`CoreLimitAdjuster`] outside its regular interval.
#[derive(Debug, Clone)]
pub struct CoreLimitHandle {
    notify: Arc<Notify>,
}

impl CoreLimitHandle {
    /// Request an adjustment round.  Triggers coalesce.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

pub struct CoreLimitAdjuster {
    store: Arc<dyn StateStore>,
    backend: Arc<dyn Backend>,
    interval: Duration,
    notify: Arc<Notify>,
}

impl CoreLimitAdjuster {
    pub fn new(
        store: Arc<dyn StateStore>,
        backend: Arc<dyn Backend>,
        config: &CoreLimitConfig,
    ) -> (Self, CoreLimitHandle) {
        let notify = Arc::new(Notify::new());
        let adjuster = Self {
            store,
            backend,
            interval: config.interval,
            notify: Arc::clone(&notify),
        };
        (adjuster, CoreLimitHandle { notify })
    }

    /// Adjust on every interval tick and every trigger until `shutdown`
    /// flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "core-limit adjuster started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("core-limit adjuster shutting down");
                        break;
                    }
                    continue;
                }
            }

            match self.adjust_once().await {
                Ok(0) => {}
                Ok(updated) => debug!(updated, "soft core limits adjusted"),
                Err(e) => warn!(error = %e, "core-limit round skipped"),
            }
        }
    }

    /// One redistribution round.  Returns how many services got a new limit.
    ///
    /// Per-service update failures are logged and skipped; only an
    /// unavailable platform aborts the round.
    pub async fn adjust_once(&self) -> Result<usize, BackendError> {
        let stats = self.backend.platform_state().await?;

        let mut by_node: HashMap<String, Vec<Service>> = HashMap::new();
        for execution in self.store.executions_by_status(&[ExecutionStatus::Running]) {
            for service in execution.services {
                if !service.is_active() || service.backend_status != BackendStatus::Started {
                    continue;
                }
                if let Some(host) = service.placement.as_ref().map(|p| p.backend_host.clone()) {
                    by_node.entry(host).or_default().push(service);
                }
            }
        }

        let mut updated = 0;
        for node in &stats.nodes {
            let Some(services) = by_node.get(&node.name) else {
                continue;
            };
            let slack = node.cores_free().max(0.0);
            let share = slack / services.len() as f64;

            for service in services {
                let cores = service.reservation.cores;
                let target = (cores.min + share).min(cores.max).max(cores.min);
                if service
                    .soft_core_limit
                    .map_or(false, |current| (current - target).abs() < CORE_EPSILON)
                {
                    continue;
                }

                if let Err(e) = self
                    .backend
                    .update_service_resource_limits(service, Some(target), None)
                    .await
                {
                    warn!(service = service.id, node = %node.name, error = %e, "cannot update soft core limit");
                    continue;
                }
                if let Err(e) = self.store.set_service_soft_cores(service.id, target) {
                    warn!(service = service.id, error = %e, "cannot record soft core limit");
                    continue;
                }
                debug!(service = %service.name, node = %node.name, cores = target, "soft core limit set");
                updated += 1;
            }
        }
        Ok(updated)
    }
}
