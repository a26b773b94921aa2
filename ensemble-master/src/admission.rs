/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Quota checks performed before an execution reaches the scheduler.

use thiserror::Error;
use tracing::{info, warn};

use crate::model::{ExecutionId, ExecutionStatus};
use crate::scheduler::{SchedulerError, SchedulerHandle};
use crate::state::{Quota, StateStore, StoreError};

/// Statuses that count against a user's quota.
const QUOTA_STATUSES: [ExecutionStatus; 3] = [
    ExecutionStatus::Scheduled,
    ExecutionStatus::Starting,
    ExecutionStatus::Running,
];

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("memory reservation of {requested} bytes over quota of {limit} bytes")]
    Memory { requested: u64, limit: u64 },

    #[error("cores reservation of {requested} over quota of {limit}")]
    Cores { requested: f64, limit: f64 },

    #[error("reached the quota limit of {limit} concurrent executions")]
    ConcurrentExecutions { limit: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl AdmissionError {
    /// `true` for quota rejections, `false` for infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AdmissionError::Memory { .. }
                | AdmissionError::Cores { .. }
                | AdmissionError::ConcurrentExecutions { .. }
        )
    }
}

/// Check `id` against its owner's quota and hand it to the scheduler.
///
/// A rejected execution ends in `error` with the rejection as its message.
pub fn admit(
    store: &dyn StateStore,
    id: ExecutionId,
    handle: &SchedulerHandle,
) -> Result<(), AdmissionError> {
    let execution = store.execution(id)?;
    let quota = store.quota_for(&execution.owner);

    if let Err(rejection) = check(store, id, &execution.owner, &quota, execution.total_reservations()) {
        warn!(execution = id, owner = %execution.owner, reason = %rejection, "execution rejected by admission control");
        store.set_error(id, &rejection.to_string())?;
        return Err(rejection);
    }

    handle.incoming(id)?;
    info!(execution = id, owner = %execution.owner, "execution admitted");
    Ok(())
}

fn check(
    store: &dyn StateStore,
    id: ExecutionId,
    owner: &str,
    quota: &Quota,
    (cores, memory): (f64, u64),
) -> Result<(), AdmissionError> {
    if memory > quota.memory {
        return Err(AdmissionError::Memory {
            requested: memory,
            limit: quota.memory,
        });
    }
    if cores > quota.cores {
        return Err(AdmissionError::Cores {
            requested: cores,
            limit: quota.cores,
        });
    }

    let others: Vec<_> = store
        .executions_for_owner(owner, &QUOTA_STATUSES)
        .into_iter()
        .filter(|e| e.id != id)
        .collect();

    if others.len() as u32 + 1 > quota.concurrent_executions {
        return Err(AdmissionError::ConcurrentExecutions {
            limit: quota.concurrent_executions,
        });
    }

    let (used_cores, used_memory) = others.iter().fold((0.0, 0u64), |(c, m), e| {
        let (ec, em) = e.total_reservations();
        (c + ec, m + em)
    });
    if used_memory + memory > quota.memory {
        return Err(AdmissionError::Memory {
            requested: used_memory + memory,
            limit: quota.memory,
        });
    }
    if used_cores + cores > quota.cores {
        return Err(AdmissionError::Cores {
            requested: used_cores + cores,
            limit: quota.cores,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::SimulatedBackend;
    use crate::config::SchedulerConfig;
    use crate::scheduler::{QueueLocation, Scheduler, SchedulerContext};
    use crate::state::memory::tests::app;
    use crate::state::{MemoryStore, QuotaTable};
    use crate::stats::tests::GIB;

    fn setup(quota: Quota) -> (Arc<MemoryStore>, Scheduler, SchedulerHandle) {
        let store = Arc::new(MemoryStore::new(QuotaTable {
            default: quota,
            ..QuotaTable::default()
        }));
        let ctx = SchedulerContext {
            store: store.clone(),
            backend: Arc::new(SimulatedBackend::new(&[])),
            deployment_name: "test".into(),
        };
        let (scheduler, handle) = Scheduler::new(ctx, SchedulerConfig::default());
        (store, scheduler, handle)
    }

    fn quota(concurrent: u32, cores: f64, memory: u64) -> Quota {
        Quota {
            concurrent_executions: concurrent,
            cores,
            memory,
            runtime_limit_secs: None,
        }
    }

    #[tokio::test]
    async fn admitted_execution_is_queued() {
        let (store, mut scheduler, handle) = setup(quota(2, 4.0, 4 * GIB));
        let e = store.create_execution("alice", app("a", 1, 1, 1.0, GIB));

        admit(store.as_ref(), e.id, &handle).unwrap();
        assert_eq!(store.execution(e.id).unwrap().status, ExecutionStatus::Scheduled);

        scheduler.run_once().await;
        assert_eq!(scheduler.queues().location(e.id), Some(QueueLocation::Pending));
    }

    #[test]
    fn single_execution_over_memory_quota() {
        let (store, _scheduler, handle) = setup(quota(2, 4.0, GIB));
        let e = store.create_execution("alice", app("a", 2, 0, 1.0, GIB));

        let err = admit(store.as_ref(), e.id, &handle).unwrap_err();
        assert!(matches!(err, AdmissionError::Memory { requested, .. } if requested == 2 * GIB));
        assert!(err.is_rejection());

        let after = store.execution(e.id).unwrap();
        assert_eq!(after.status, ExecutionStatus::Error);
        assert!(after.error_message.unwrap().contains("memory"));
    }

    #[test]
    fn single_execution_over_cores_quota() {
        let (store, _scheduler, handle) = setup(quota(2, 1.5, 8 * GIB));
        let e = store.create_execution("alice", app("a", 2, 0, 1.0, GIB));
        assert!(matches!(
            admit(store.as_ref(), e.id, &handle),
            Err(AdmissionError::Cores { .. })
        ));
    }

    #[test]
    fn concurrent_execution_limit() {
        let (store, _scheduler, handle) = setup(quota(1, 8.0, 8 * GIB));
        let first = store.create_execution("alice", app("a", 1, 0, 1.0, GIB));
        admit(store.as_ref(), first.id, &handle).unwrap();

        let second = store.create_execution("alice", app("b", 1, 0, 1.0, GIB));
        assert!(matches!(
            admit(store.as_ref(), second.id, &handle),
            Err(AdmissionError::ConcurrentExecutions { limit: 1 })
        ));

        // Other users are unaffected.
        let other = store.create_execution("bob", app("c", 1, 0, 1.0, GIB));
        admit(store.as_ref(), other.id, &handle).unwrap();
    }

    #[test]
    fn cumulative_reservations_count() {
        let (store, _scheduler, handle) = setup(quota(5, 8.0, 3 * GIB));
        let first = store.create_execution("alice", app("a", 2, 0, 1.0, GIB));
        admit(store.as_ref(), first.id, &handle).unwrap();

        let second = store.create_execution("alice", app("b", 2, 0, 1.0, GIB));
        let err = admit(store.as_ref(), second.id, &handle).unwrap_err();
        assert!(matches!(err, AdmissionError::Memory { requested, limit } if requested == 4 * GIB && limit == 3 * GIB));
    }

    #[test]
    fn finished_executions_do_not_count() {
        let (store, _scheduler, handle) = setup(quota(1, 8.0, 8 * GIB));
        let first = store.create_execution("alice", app("a", 1, 0, 1.0, GIB));
        admit(store.as_ref(), first.id, &handle).unwrap();
        store.set_terminated(first.id, None).unwrap();

        let second = store.create_execution("alice", app("b", 1, 0, 1.0, GIB));
        admit(store.as_ref(), second.id, &handle).unwrap();
    }
}
