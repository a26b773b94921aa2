/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Queue membership and per-execution bookkeeping of the scheduling loop.
//!
//! Three queues hold execution ids:
//!
//! ```text
//!             incoming                 all services up
//!   ──────────────────►  pending  ─────────────────────►  running
//!                          ▲  │                             │
//!                          │  └──── elastic died ◄──────────┘
//!                          │
//!   terminate / fatal ─────┴──────────►  termination  ──► (gone)
//! ```
//!
//! An id is in at most one queue at any time.  [`ExecutionQueues`] is owned
//! by the scheduling loop alone, so none of this needs locking.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::model::ExecutionId;

// ── Ranking policy ────────────────────────────────────────────────────────────

/// Ordering applied to the pending queue before every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Arrival order.
    #[default]
    Fifo,
    /// Ascending declared size (shortest job first).
    Size,
    /// Ascending remaining size `(1 - progress) * size` (shortest remaining
    /// processing time).
    DynSize,
}

impl QueuePolicy {
    /// Parse a configured policy name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "FIFO" => Some(QueuePolicy::Fifo),
            "SIZE" => Some(QueuePolicy::Size),
            "DYNSIZE" => Some(QueuePolicy::DynSize),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueuePolicy::Fifo => "FIFO",
            QueuePolicy::Size => "SIZE",
            QueuePolicy::DynSize => "DYNSIZE",
        }
    }
}

impl fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Bookkeeping ───────────────────────────────────────────────────────────────

/// Which queue currently holds an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueLocation {
    Pending,
    Running,
    Termination,
}

#[derive(Debug, Clone)]
struct ExecutionProgress {
    /// Declared size at submission.
    size_hint: f64,
    /// Size used for ranking; equals `size_hint` except under DYNSIZE.
    size: f64,
    /// Cumulative progress in `[0, 1]`.
    progress: f64,
    last_attempt: Option<Instant>,
    /// Consecutive transient start failures.
    retries: u32,
    retry_at: Option<Instant>,
}

impl ExecutionProgress {
    fn new(size_hint: f64) -> Self {
        Self {
            size_hint,
            size: size_hint,
            progress: 0.0,
            last_attempt: None,
            retries: 0,
            retry_at: None,
        }
    }
}

// ── ExecutionQueues ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ExecutionQueues {
    policy: QueuePolicy,
    pending: Vec<ExecutionId>,
    running: Vec<ExecutionId>,
    termination: Vec<ExecutionId>,
    progress: HashMap<ExecutionId, ExecutionProgress>,
}

impl ExecutionQueues {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
            running: Vec::new(),
            termination: Vec::new(),
            progress: HashMap::new(),
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn pending(&self) -> &[ExecutionId] {
        &self.pending
    }

    pub fn running(&self) -> &[ExecutionId] {
        &self.running
    }

    pub fn termination(&self) -> &[ExecutionId] {
        &self.termination
    }

    pub fn location(&self, id: ExecutionId) -> Option<QueueLocation> {
        if self.pending.contains(&id) {
            Some(QueueLocation::Pending)
        } else if self.running.contains(&id) {
            Some(QueueLocation::Running)
        } else if self.termination.contains(&id) {
            Some(QueueLocation::Termination)
        } else {
            None
        }
    }

    /// Ranking size of a queued execution.
    pub fn size(&self, id: ExecutionId) -> Option<f64> {
        self.progress.get(&id).map(|p| p.size)
    }

    /// Append a new execution to the pending queue.
    ///
    /// Returns `false` (and changes nothing) if the id is already queued.
    pub fn enqueue(&mut self, id: ExecutionId, size_hint: f64) -> bool {
        if self.location(id).is_some() {
            return false;
        }
        self.pending.push(id);
        self.progress.insert(id, ExecutionProgress::new(size_hint));
        true
    }

    /// Pending → running.
    pub fn move_to_running(&mut self, id: ExecutionId) -> bool {
        if !remove_id(&mut self.pending, id) {
            return false;
        }
        self.running.push(id);
        if let Some(p) = self.progress.get_mut(&id) {
            p.retries = 0;
            p.retry_at = None;
        }
        true
    }

    /// Running → pending, keeping the progress entry.
    pub fn move_to_pending(&mut self, id: ExecutionId) -> bool {
        if !remove_id(&mut self.running, id) {
            return false;
        }
        self.pending.push(id);
        self.progress
            .entry(id)
            .or_insert_with(|| ExecutionProgress::new(1.0));
        true
    }

    /// Pending / running → termination.
    ///
    /// Returns `true` if the id entered the termination queue now; an id
    /// already awaiting termination is left alone.
    pub fn begin_termination(&mut self, id: ExecutionId) -> bool {
        if self.termination.contains(&id) {
            return false;
        }
        remove_id(&mut self.pending, id);
        remove_id(&mut self.running, id);
        self.progress.remove(&id);
        self.termination.push(id);
        true
    }

    /// Teardown done: forget the execution.
    pub fn finish_termination(&mut self, id: ExecutionId) -> bool {
        remove_id(&mut self.termination, id)
    }

    /// Drop an execution from every queue (fatal start, vanished record).
    pub fn remove(&mut self, id: ExecutionId) {
        remove_id(&mut self.pending, id);
        remove_id(&mut self.running, id);
        remove_id(&mut self.termination, id);
        self.progress.remove(&id);
    }

    // ── Ranking ───────────────────────────────────────────────────────────────

    /// Re-rank the pending queue per the active policy.
    ///
    /// Under DYNSIZE every execution that was attempted before accumulates
    /// `elapsed / size_hint` of progress first.  Sorting is stable.
    pub fn rank(&mut self, now: Instant) {
        if self.policy == QueuePolicy::DynSize {
            self.refresh_sizes(now);
        }
        match self.policy {
            QueuePolicy::Fifo => {}
            QueuePolicy::Size | QueuePolicy::DynSize => {
                let progress = &self.progress;
                let size_of = |id: &ExecutionId| progress.get(id).map_or(f64::MAX, |p| p.size);
                self.pending
                    .sort_by(|a, b| size_of(a).total_cmp(&size_of(b)));
            }
        }
    }

    fn refresh_sizes(&mut self, now: Instant) {
        for id in &self.pending {
            let Some(p) = self.progress.get_mut(id) else {
                continue;
            };
            if let Some(last) = p.last_attempt {
                if p.size_hint > 0.0 {
                    let elapsed = now.saturating_duration_since(last).as_secs_f64();
                    p.progress = (p.progress + elapsed / p.size_hint).clamp(0.0, 1.0);
                }
                p.last_attempt = Some(now);
            }
            p.size = (1.0 - p.progress) * p.size_hint;
        }
    }

    /// Record that `id` took part in a pass at `now`.
    pub fn mark_attempted(&mut self, id: ExecutionId, now: Instant) {
        if let Some(p) = self.progress.get_mut(&id) {
            if p.last_attempt.is_none() {
                p.last_attempt = Some(now);
            }
        }
    }

    /// Pending executions, in rank order, that are not backing off.
    pub fn candidates(&self, now: Instant) -> Vec<ExecutionId> {
        self.pending
            .iter()
            .copied()
            .filter(|id| !self.in_backoff(*id, now))
            .collect()
    }

    // ── Retry backoff ─────────────────────────────────────────────────────────

    pub fn in_backoff(&self, id: ExecutionId, now: Instant) -> bool {
        self.progress
            .get(&id)
            .and_then(|p| p.retry_at)
            .map_or(false, |at| at > now)
    }

    /// Register a transient start failure and return the delay before the
    /// next attempt: `base * 2^(retries - 1)`, capped at `max`.
    pub fn record_retry(
        &mut self,
        id: ExecutionId,
        now: Instant,
        base: Duration,
        max: Duration,
    ) -> Duration {
        let Some(p) = self.progress.get_mut(&id) else {
            return Duration::ZERO;
        };
        p.retries = p.retries.saturating_add(1);
        let exp = p.retries.saturating_sub(1).min(31);
        let delay = base.saturating_mul(1u32 << exp).min(max);
        p.retry_at = Some(now + delay);
        delay
    }

    pub fn clear_backoff(&mut self, id: ExecutionId) {
        if let Some(p) = self.progress.get_mut(&id) {
            p.retries = 0;
            p.retry_at = None;
        }
    }

    /// Earliest moment after `now` at which a backing-off pending execution
    /// becomes eligible.
    pub fn next_retry_deadline(&self, now: Instant) -> Option<Instant> {
        self.pending
            .iter()
            .filter_map(|id| self.progress.get(id).and_then(|p| p.retry_at))
            .filter(|at| *at > now)
            .min()
    }
}

fn remove_id(queue: &mut Vec<ExecutionId>, id: ExecutionId) -> bool {
    match queue.iter().position(|&x| x == id) {
        Some(pos) => {
            queue.remove(pos);
            true
        }
        None => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
