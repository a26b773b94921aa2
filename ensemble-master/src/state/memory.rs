/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-process [`StateStore`] backed by a single `RwLock`.
//!
//! Nothing is persisted across restarts; deployments that need durability
//! plug a relational implementation in behind the same trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::{Quota, QuotaTable, StateStore, StoreError};
use crate::app::ApplicationDescription;
use crate::model::{
    epoch_secs, BackendStatus, Execution, ExecutionId, ExecutionStatus, Placement, Service,
    ServiceId, ServiceStatus,
};

#[derive(Debug, Default)]
struct Inner {
    executions: BTreeMap<ExecutionId, Execution>,
    /// service id → owning execution id.
    service_index: HashMap<ServiceId, ExecutionId>,
    next_execution_id: ExecutionId,
    next_service_id: ServiceId,
}

impl Inner {
    fn execution_mut(&mut self, id: ExecutionId) -> Result<&mut Execution, StoreError> {
        self.executions
            .get_mut(&id)
            .ok_or(StoreError::ExecutionNotFound(id))
    }

    fn service_mut(&mut self, id: ServiceId) -> Result<&mut Service, StoreError> {
        let exec_id = *self
            .service_index
            .get(&id)
            .ok_or(StoreError::ServiceNotFound(id))?;
        self.executions
            .get_mut(&exec_id)
            .and_then(|e| e.services.iter_mut().find(|s| s.id == id))
            .ok_or(StoreError::ServiceNotFound(id))
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    quotas: QuotaTable,
}

impl MemoryStore {
    pub fn new(quotas: QuotaTable) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_execution_id: 1,
                next_service_id: 1,
                ..Default::default()
            }),
            quotas,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update_execution<F>(&self, id: ExecutionId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Execution),
    {
        let mut inner = self.write();
        let exec = inner.execution_mut(id)?;
        f(exec);
        debug!(execution = id, status = %exec.status, "execution updated");
        Ok(())
    }

    fn update_service<F>(&self, id: ServiceId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Service),
    {
        let mut inner = self.write();
        let svc = inner.service_mut(id)?;
        f(svc);
        debug!(
            service = id,
            status = %svc.status,
            backend_status = %svc.backend_status,
            "service updated"
        );
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Pretend `id` started running `secs` seconds ago.
    pub(crate) fn backdate_start(&self, id: ExecutionId, secs: u64) {
        if let Ok(e) = self.write().execution_mut(id) {
            e.time_start = Some(epoch_secs().saturating_sub(secs));
        }
    }
}

impl StateStore for MemoryStore {
    fn create_execution(&self, owner: &str, description: ApplicationDescription) -> Execution {
        let mut inner = self.write();
        let id = inner.next_execution_id.max(1);
        inner.next_execution_id = id + 1;

        let mut services = Vec::new();
        for template in description.digest() {
            let sid = inner.next_service_id.max(1);
            inner.next_service_id = sid + 1;
            inner.service_index.insert(sid, id);
            services.push(template.into_service(sid, id));
        }

        let execution = Execution {
            id,
            owner: owner.to_string(),
            name: description.name.clone(),
            size: description.size,
            description,
            status: ExecutionStatus::Submitted,
            time_submit: epoch_secs(),
            time_start: None,
            time_end: None,
            error_message: None,
            services,
        };
        inner.executions.insert(id, execution.clone());
        execution
    }

    fn execution(&self, id: ExecutionId) -> Result<Execution, StoreError> {
        self.read()
            .executions
            .get(&id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(id))
    }

    fn executions_by_status(&self, statuses: &[ExecutionStatus]) -> Vec<Execution> {
        self.read()
            .executions
            .values()
            .filter(|e| statuses.contains(&e.status))
            .cloned()
            .collect()
    }

    fn executions_for_owner(&self, owner: &str, statuses: &[ExecutionStatus]) -> Vec<Execution> {
        self.read()
            .executions
            .values()
            .filter(|e| e.owner == owner && statuses.contains(&e.status))
            .cloned()
            .collect()
    }

    fn set_scheduled(&self, id: ExecutionId) -> Result<(), StoreError> {
        self.update_execution(id, |e| e.status = ExecutionStatus::Scheduled)
    }

    fn set_starting(&self, id: ExecutionId) -> Result<(), StoreError> {
        self.update_execution(id, |e| e.status = ExecutionStatus::Starting)
    }

    fn set_running(&self, id: ExecutionId) -> Result<(), StoreError> {
        self.update_execution(id, |e| {
            e.status = ExecutionStatus::Running;
            if e.time_start.is_none() {
                e.time_start = Some(epoch_secs());
            }
        })
    }

    fn set_cleaning_up(&self, id: ExecutionId) -> Result<(), StoreError> {
        self.update_execution(id, |e| e.status = ExecutionStatus::CleaningUp)
    }

    fn set_terminated(&self, id: ExecutionId, reason: Option<&str>) -> Result<(), StoreError> {
        self.update_execution(id, |e| {
            e.status = ExecutionStatus::Terminated;
            e.time_end = Some(epoch_secs());
            if let Some(r) = reason {
                e.error_message = Some(r.to_string());
            }
        })
    }

    fn set_error(&self, id: ExecutionId, message: &str) -> Result<(), StoreError> {
        self.update_execution(id, |e| {
            e.status = ExecutionStatus::Error;
            e.time_end = Some(epoch_secs());
            e.error_message = Some(message.to_string());
        })
    }

    fn set_error_message(&self, id: ExecutionId, message: &str) -> Result<(), StoreError> {
        self.update_execution(id, |e| e.error_message = Some(message.to_string()))
    }

    fn set_size(&self, id: ExecutionId, size: f64) -> Result<(), StoreError> {
        self.update_execution(id, |e| e.size = size)
    }

    fn set_service_starting(&self, id: ServiceId) -> Result<(), StoreError> {
        self.update_service(id, |s| s.status = ServiceStatus::Starting)
    }

    fn set_service_active(&self, id: ServiceId, placement: Placement) -> Result<(), StoreError> {
        self.update_service(id, |s| {
            s.status = ServiceStatus::Active;
            s.backend_status = BackendStatus::Started;
            s.placement = Some(placement);
            s.error_message = None;
        })
    }

    fn set_service_error(&self, id: ServiceId, message: &str) -> Result<(), StoreError> {
        self.update_service(id, |s| {
            s.status = ServiceStatus::Error;
            s.error_message = Some(message.to_string());
        })
    }

    fn set_service_terminating(&self, id: ServiceId) -> Result<(), StoreError> {
        self.update_service(id, |s| s.status = ServiceStatus::Terminating)
    }

    fn set_service_inactive(&self, id: ServiceId) -> Result<(), StoreError> {
        self.update_service(id, |s| {
            s.status = ServiceStatus::Inactive;
            s.placement = None;
            s.soft_core_limit = None;
        })
    }

    fn set_backend_status(&self, id: ServiceId, status: BackendStatus) -> Result<(), StoreError> {
        self.update_service(id, |s| s.backend_status = status)
    }

    fn set_service_soft_cores(&self, id: ServiceId, cores: f64) -> Result<(), StoreError> {
        self.update_service(id, |s| s.soft_core_limit = Some(cores))
    }

    fn quota_for(&self, owner: &str) -> Quota {
        self.quotas.for_user(owner).clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
