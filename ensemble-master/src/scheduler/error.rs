/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error and outcome types for the scheduling loop.
//!
//! Two types model the two failure layers:
//!
//! * [`StartOutcome`]: what a single start attempt for one execution
//!   produced.  The loop switches on it; nothing is signalled through
//!   errors.
//! * [`SchedulerError`]: failures of an operation on the scheduler itself
//!   (a store write failed, the loop has stopped).
//!
//! The loop never propagates a [`SchedulerError`] out of a pass: it logs it
//! and waits for the next trigger.

use thiserror::Error;

use crate::backend::BackendError;
use crate::state::StoreError;

// ── Start outcomes ────────────────────────────────────────────────────────────

/// Result of trying to start a set of services of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Every requested service is running.
    Ok,

    /// A transient failure; the partial start was torn down and the
    /// execution goes back to the pending queue.
    Retry(String),

    /// The execution cannot start as described; it ends in `error`.
    Fatal(String),
}

impl StartOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, StartOutcome::Ok)
    }
}

impl From<BackendError> for StartOutcome {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Retryable(msg) | BackendError::Unavailable(msg) => {
                StartOutcome::Retry(msg)
            }
            BackendError::Fatal(msg) => StartOutcome::Fatal(msg),
        }
    }
}

// ── Top-level scheduler errors ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A persistence call failed; the record may have been deleted under us.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The scheduling loop has stopped and no longer accepts commands.
    #[error("scheduler loop is not running")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_outcomes() {
        assert_eq!(
            StartOutcome::from(BackendError::Retryable("busy".into())),
            StartOutcome::Retry("busy".into())
        );
        assert_eq!(
            StartOutcome::from(BackendError::Unavailable("down".into())),
            StartOutcome::Retry("down".into())
        );
        assert_eq!(
            StartOutcome::from(BackendError::Fatal("no image".into())),
            StartOutcome::Fatal("no image".into())
        );
    }

    #[test]
    fn store_errors_convert() {
        let err: SchedulerError = StoreError::ExecutionNotFound(4).into();
        assert_eq!(err.to_string(), "execution 4 not found");
    }
}
