/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Backend status synchronizer.
//!
//! Polls the backend for the state of every placed, active service and
//! writes changes through [`StateStore::set_backend_status`].  That field is
//! the only thing it writes.  When a container is seen dead the scheduler is
//! triggered so its health check runs without waiting for the self-trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::model::ExecutionStatus;
use crate::scheduler::SchedulerHandle;
use crate::state::StateStore;

/// Executions whose containers are worth polling.
const LIVE_STATUSES: [ExecutionStatus; 3] = [
    ExecutionStatus::Starting,
    ExecutionStatus::Running,
    ExecutionStatus::CleaningUp,
];

/// Outcome of one polling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub polled: usize,
    pub changed: usize,
    pub died: usize,
}

pub struct StatusSynchronizer {
    store: Arc<dyn StateStore>,
    backend: Arc<dyn Backend>,
    scheduler: SchedulerHandle,
    interval: Duration,
}

impl StatusSynchronizer {
    pub fn new(
        store: Arc<dyn StateStore>,
        backend: Arc<dyn Backend>,
        scheduler: SchedulerHandle,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            scheduler,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "status synchronizer started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sync_once().await;
                    if report.changed > 0 {
                        debug!(?report, "backend status synchronized");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("status synchronizer shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Poll every placed, active service of a live execution once.
    pub async fn sync_once(&self) -> SyncReport {
        let mut report = SyncReport::default();

        for execution in self.store.executions_by_status(&LIVE_STATUSES) {
            for service in execution
                .services
                .iter()
                .filter(|s| s.is_active() && s.placement.is_some())
            {
                report.polled += 1;
                let status = match self.backend.service_status(service).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(service = service.id, error = %e, "cannot query service status");
                        continue;
                    }
                };
                if status == service.backend_status {
                    continue;
                }
                if let Err(e) = self.store.set_backend_status(service.id, status) {
                    warn!(service = service.id, error = %e, "cannot record backend status");
                    continue;
                }
                report.changed += 1;
                if status.is_dead() {
                    info!(
                        execution = execution.id,
                        service = %service.name,
                        %status,
                        "container exited"
                    );
                    report.died += 1;
                }
            }
        }

        if report.died > 0 {
            self.scheduler.trigger();
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backend::SimulatedBackend;
    use crate::config::{NodeConfig, SchedulerConfig};
    use crate::model::{BackendStatus, ExecutionId};
    use crate::scheduler::{QueueLocation, Scheduler, SchedulerContext};
    use crate::state::memory::tests::app;
    use crate::state::{MemoryStore, QuotaTable};
    use crate::stats::tests::GIB;

    struct Fixture {
        store: Arc<MemoryStore>,
        backend: Arc<SimulatedBackend>,
        scheduler: Scheduler,
        sync: StatusSynchronizer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new(QuotaTable::default()));
        let backend = Arc::new(SimulatedBackend::new(&[NodeConfig::default_config("node01")]));
        let (scheduler, handle) = Scheduler::new(
            SchedulerContext {
                store: store.clone(),
                backend: backend.clone(),
                deployment_name: "test".into(),
            },
            SchedulerConfig::default(),
        );
        let sync = StatusSynchronizer::new(
            store.clone(),
            backend.clone(),
            handle,
            Duration::from_secs(3600),
        );
        Fixture {
            store,
            backend,
            scheduler,
            sync,
        }
    }

    async fn running(f: &mut Fixture, essential: u32, elastic: u32) -> ExecutionId {
        let e = f
            .store
            .create_execution("alice", app("job", essential, elastic, 0.5, 256 * 1024 * 1024));
        f.sync.scheduler.incoming(e.id).unwrap();
        f.scheduler.run_once().await;
        assert_eq!(f.store.execution(e.id).unwrap().status, ExecutionStatus::Running);
        e.id
    }

    #[tokio::test]
    async fn healthy_services_produce_no_changes() {
        let mut f = fixture();
        running(&mut f, 1, 1).await;

        let report = f.sync.sync_once().await;
        assert_eq!(report.polled, 2);
        assert_eq!(report.changed, 0);
        assert_eq!(report.died, 0);
    }

    #[tokio::test]
    async fn death_is_recorded_and_handled_by_scheduler() {
        let mut f = fixture();
        let id = running(&mut f, 1, 1).await;
        let elastic = f.store.execution(id).unwrap().services[1].id;
        f.backend.kill_service(elastic, BackendStatus::Died);

        let report = f.sync.sync_once().await;
        assert_eq!(report.changed, 1);
        assert_eq!(report.died, 1);
        let svc = f.store.execution(id).unwrap().services[1].clone();
        assert_eq!(svc.backend_status, BackendStatus::Died);

        // The trigger wakes the loop; a pass replaces the dead replica.
        f.scheduler.run_once().await;
        let svc = f.store.execution(id).unwrap().services[1].clone();
        assert_eq!(svc.backend_status, BackendStatus::Started);
        assert_eq!(f.scheduler.queues().location(id), Some(QueueLocation::Running));
    }

    #[tokio::test]
    async fn vanished_container_reports_destroyed() {
        let mut f = fixture();
        let id = running(&mut f, 1, 0).await;
        let svc = f.store.execution(id).unwrap().services[0].clone();
        f.backend.terminate_service(&svc).await.unwrap();

        let report = f.sync.sync_once().await;
        assert_eq!(report.changed, 1);
        assert_eq!(report.died, 0);
        assert_eq!(
            f.store.execution(id).unwrap().services[0].backend_status,
            BackendStatus::Destroyed
        );
    }

    #[tokio::test]
    async fn finished_executions_are_not_polled() {
        let mut f = fixture();
        let id = running(&mut f, 1, 0).await;
        f.store.set_terminated(id, None).unwrap();
        assert_eq!(f.sync.sync_once().await.polled, 0);
    }
}
