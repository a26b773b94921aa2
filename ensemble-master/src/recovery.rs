/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Start-up recovery.
//!
//! The scheduler queues live only in memory; persisted execution status is
//! the source of truth after a restart.  [`recover`] replays it into a fresh
//! scheduler before the loop starts.

use tracing::{info, warn};

use crate::model::ExecutionStatus;
use crate::scheduler::SchedulerHandle;
use crate::state::StateStore;

/// Statuses whose executions go back into the pending queue.
const REQUEUE_STATUSES: [ExecutionStatus; 3] = [
    ExecutionStatus::Scheduled,
    ExecutionStatus::Starting,
    ExecutionStatus::Running,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub terminating: usize,
}

/// Re-enqueue every unfinished execution found in `store`.
///
/// Executions stuck in `cleaning-up` are handed to the termination path
/// again.  Individual failures are logged and skipped.
pub fn recover(store: &dyn StateStore, handle: &SchedulerHandle) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    for execution in store.executions_by_status(&REQUEUE_STATUSES) {
        match handle.incoming(execution.id) {
            Ok(()) => report.requeued += 1,
            Err(e) => warn!(execution = execution.id, error = %e, "cannot requeue execution"),
        }
    }

    for execution in store.executions_by_status(&[ExecutionStatus::CleaningUp]) {
        match handle.terminate(execution.id) {
            Ok(()) => report.terminating += 1,
            Err(e) => warn!(execution = execution.id, error = %e, "cannot resume termination"),
        }
    }

    info!(
        requeued = report.requeued,
        terminating = report.terminating,
        "recovered executions from the state store"
    );
    report
}
