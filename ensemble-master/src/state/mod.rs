/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Persistence collaborator: execution / service records and quotas.
//!
//! The scheduler never mutates an [`Execution`] it holds; it calls the
//! field-level setters below instead.  Every setter is an independent,
//! idempotent update, so the scheduling loop, the status synchronizer and
//! the admission layer may call them concurrently.

pub mod memory;

pub use memory::MemoryStore;

use std::collections::HashMap;

use thiserror::Error;

use crate::app::ApplicationDescription;
use crate::model::{
    BackendStatus, Execution, ExecutionId, ExecutionStatus, Placement, ServiceId,
};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("execution {0} not found")]
    ExecutionNotFound(ExecutionId),

    #[error("service {0} not found")]
    ServiceNotFound(ServiceId),
}

// ── Quotas ────────────────────────────────────────────────────────────────────

/// Per-user ceiling on concurrent work, checked at admission time.
#[derive(Debug, Clone, PartialEq)]
pub struct Quota {
    pub concurrent_executions: u32,
    /// Fractional CPUs.
    pub cores: f64,
    /// Bytes.
    pub memory: u64,
    /// Maximum wall-clock run time of one execution, in seconds.
    pub runtime_limit_secs: Option<u64>,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            concurrent_executions: 5,
            cores: 16.0,
            memory: 64 * 1024 * 1024 * 1024,
            runtime_limit_secs: None,
        }
    }
}

/// Default quota plus per-user overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaTable {
    pub default: Quota,
    pub users: HashMap<String, Quota>,
}

impl QuotaTable {
    pub fn for_user(&self, owner: &str) -> &Quota {
        self.users.get(owner).unwrap_or(&self.default)
    }
}

// ── StateStore ────────────────────────────────────────────────────────────────

/// CRUD plus status transitions for executions and services.
pub trait StateStore: Send + Sync {
    /// Create an execution in `submitted` status and digest its services.
    fn create_execution(&self, owner: &str, description: ApplicationDescription) -> Execution;

    fn execution(&self, id: ExecutionId) -> Result<Execution, StoreError>;

    fn executions_by_status(&self, statuses: &[ExecutionStatus]) -> Vec<Execution>;

    fn executions_for_owner(&self, owner: &str, statuses: &[ExecutionStatus]) -> Vec<Execution>;

    // ── Execution transitions ─────────────────────────────────────────────────

    fn set_scheduled(&self, id: ExecutionId) -> Result<(), StoreError>;

    fn set_starting(&self, id: ExecutionId) -> Result<(), StoreError>;

    /// Also stamps `time_start` on the first transition.
    fn set_running(&self, id: ExecutionId) -> Result<(), StoreError>;

    fn set_cleaning_up(&self, id: ExecutionId) -> Result<(), StoreError>;

    /// Final state after teardown; `reason` is stored as the error message.
    fn set_terminated(&self, id: ExecutionId, reason: Option<&str>) -> Result<(), StoreError>;

    /// Final failure state with a human-readable message.
    fn set_error(&self, id: ExecutionId, message: &str) -> Result<(), StoreError>;

    /// Record an error message without changing status.
    fn set_error_message(&self, id: ExecutionId, message: &str) -> Result<(), StoreError>;

    fn set_size(&self, id: ExecutionId, size: f64) -> Result<(), StoreError>;

    // ── Service transitions ───────────────────────────────────────────────────

    fn set_service_starting(&self, id: ServiceId) -> Result<(), StoreError>;

    /// Mark running at `placement`; backend status becomes `started`.
    fn set_service_active(&self, id: ServiceId, placement: Placement) -> Result<(), StoreError>;

    fn set_service_error(&self, id: ServiceId, message: &str) -> Result<(), StoreError>;

    fn set_service_terminating(&self, id: ServiceId) -> Result<(), StoreError>;

    /// Back to not running; clears placement and soft limits.
    fn set_service_inactive(&self, id: ServiceId) -> Result<(), StoreError>;

    fn set_backend_status(&self, id: ServiceId, status: BackendStatus) -> Result<(), StoreError>;

    fn set_service_soft_cores(&self, id: ServiceId, cores: f64) -> Result<(), StoreError>;

    // ── Quotas ────────────────────────────────────────────────────────────────

    fn quota_for(&self, owner: &str) -> Quota;
}
