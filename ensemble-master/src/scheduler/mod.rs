//! Elastic scheduling loop.
//!
//! [`Scheduler`] is a single long-lived task that owns the execution queues
//! and makes every placement decision.  Everything else talks to it through
//! a cloneable [`SchedulerHandle`], which only *enqueues* commands:
//!
//! ```text
//!  admission / recovery ──incoming──┐
//!  API / health check ───terminate──┤   mpsc    ┌──────────────────────┐
//!  synchronizer ─────────trigger────┼──────────►│ Scheduler::run()     │──► Backend
//!  shutdown ─────────────quit───────┘           │  (single writer of   │──► StateStore
//!                                               │   queue membership)  │
//!                                               └──────────────────────┘
//! ```
//!
//! # One pass ([`Scheduler::run_once`])
//! 1. Hand queued terminations to background teardown workers.
//! 2. Health-check running executions (dead services, runtime limits).
//! 3. While the pending queue has eligible executions: rank it, take a
//!    cluster snapshot, simulate placements, start what the simulation
//!    admitted.  Stop when nothing new starts.
//! 4. Wake the core-limit adjuster and publish queue statistics.
//!
//! Commands that arrive while a pass runs are drained together before the
//! next one, so any number of triggers coalesce into one extra pass.

pub mod error;
pub mod launch;
pub mod queue;

pub use error::{SchedulerError, StartOutcome};
pub use launch::Launcher;
pub use queue::{ExecutionQueues, QueueLocation, QueuePolicy};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::cluster::ClusterSnapshot;
use crate::config::SchedulerConfig;
use crate::core_limit::CoreLimitHandle;
use crate::model::{epoch_secs, Execution, ExecutionId, ExecutionStatus, ServiceId};
use crate::state::StateStore;

// ── Context and statistics ────────────────────────────────────────────────────

/// Collaborators injected into the scheduler at construction.
#[derive(Clone)]
pub struct SchedulerContext {
    pub store: Arc<dyn StateStore>,
    pub backend: Arc<dyn Backend>,
    /// Deployment name used in container names.
    pub deployment_name: String,
}

/// Queue snapshot published after every pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub queue_length: usize,
    pub running_length: usize,
    pub termination_queue_length: usize,
    /// Pending ids in rank order.
    pub queue: Vec<ExecutionId>,
    pub running_queue: Vec<ExecutionId>,
    pub termination_queue: Vec<ExecutionId>,
}

impl SchedulerStats {
    fn from_queues(q: &ExecutionQueues) -> Self {
        Self {
            queue_length: q.pending().len(),
            running_length: q.running().len(),
            termination_queue_length: q.termination().len(),
            queue: q.pending().to_vec(),
            running_queue: q.running().to_vec(),
            termination_queue: q.termination().to_vec(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Incoming(ExecutionId),
    Terminate(ExecutionId),
    Trigger,
    Quit,
}

// ── SchedulerHandle ───────────────────────────────────────────────────────────

/// Cloneable front door to a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
    stats: watch::Receiver<SchedulerStats>,
    store: Arc<dyn StateStore>,
}

impl SchedulerHandle {
    /// Queue a new (or recovered) execution and wake the loop.
    ///
    /// A `submitted` execution becomes `scheduled`; recovered executions
    /// keep their status.
    pub fn incoming(&self, id: ExecutionId) -> Result<(), SchedulerError> {
        let execution = self.store.execution(id)?;
        if execution.status == ExecutionStatus::Submitted {
            self.store.set_scheduled(id)?;
        }
        self.send(Command::Incoming(id))
    }

    /// Mark an execution `cleaning-up` and hand it to the loop for teardown.
    ///
    /// Executions that already reached a final state are left alone.
    pub fn terminate(&self, id: ExecutionId) -> Result<(), SchedulerError> {
        let execution = self.store.execution(id)?;
        if !execution.status.is_active() {
            debug!(execution = id, status = %execution.status, "terminate on finished execution ignored");
            return Ok(());
        }
        self.store.set_cleaning_up(id)?;
        self.send(Command::Terminate(id))
    }

    /// Request an extra pass.  Harmless if the loop has stopped.
    pub fn trigger(&self) {
        if self.tx.send(Command::Trigger).is_err() {
            debug!("trigger dropped, scheduler loop is not running");
        }
    }

    /// Ask the loop to stop after the current pass.
    pub fn quit(&self) {
        let _ = self.tx.send(Command::Quit);
    }

    /// Queue statistics as of the last completed pass.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.borrow().clone()
    }

    fn send(&self, cmd: Command) -> Result<(), SchedulerError> {
        self.tx.send(cmd).map_err(|_| SchedulerError::ChannelClosed)
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// The scheduling loop.  See the module docs for the pass structure.
pub struct Scheduler {
    ctx: SchedulerContext,
    config: SchedulerConfig,
    queues: ExecutionQueues,
    rx: mpsc::UnboundedReceiver<Command>,
    stats_tx: watch::Sender<SchedulerStats>,
    /// Background teardown workers; each yields the execution it finished.
    terminations: JoinSet<ExecutionId>,
    /// Worker task → execution, so a panicked worker can be traced back.
    workers: HashMap<TaskId, ExecutionId>,
    in_flight: HashSet<ExecutionId>,
    /// Message to store when a queued termination completes.
    termination_reasons: HashMap<ExecutionId, Option<String>>,
    core_limit: Option<CoreLimitHandle>,
    quit: bool,
}

impl Scheduler {
    pub fn new(ctx: SchedulerContext, config: SchedulerConfig) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(SchedulerStats::default());
        let handle = SchedulerHandle {
            tx,
            stats: stats_rx,
            store: Arc::clone(&ctx.store),
        };
        let scheduler = Self {
            queues: ExecutionQueues::new(config.policy),
            ctx,
            config,
            rx,
            stats_tx,
            terminations: JoinSet::new(),
            workers: HashMap::new(),
            in_flight: HashSet::new(),
            termination_reasons: HashMap::new(),
            core_limit: None,
            quit: false,
        };
        (scheduler, handle)
    }

    /// Wake `handle`'s adjuster at the end of every pass.
    pub fn with_core_limit(mut self, handle: CoreLimitHandle) -> Self {
        self.core_limit = Some(handle);
        self
    }

    pub fn queues(&self) -> &ExecutionQueues {
        &self.queues
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats::from_queues(&self.queues)
    }

    // ── Main loop ─────────────────────────────────────────────────────────────

    /// Run until [`SchedulerHandle::quit`] or until every handle is dropped.
    ///
    /// In-flight teardown workers are awaited before returning.
    pub async fn run(mut self) {
        info!(
            policy = %self.config.policy,
            placement = %self.config.placement,
            self_trigger_secs = self.config.self_trigger.as_secs(),
            "scheduler loop started"
        );

        let mut self_trigger = tokio::time::interval(self.config.self_trigger);
        self_trigger.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        self_trigger.tick().await;

        loop {
            let retry_at = self.queues.next_retry_deadline(Instant::now());
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        info!("all scheduler handles dropped");
                        break;
                    }
                },
                _ = self_trigger.tick() => debug!("periodic self-trigger"),
                Some(done) = self.terminations.join_next_with_id(), if !self.terminations.is_empty() => {
                    self.termination_done(done);
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    debug!("retry backoff elapsed");
                }
            }

            if self.quit {
                break;
            }
            self.run_once().await;
            if self.quit {
                break;
            }
        }

        self.wait_terminations().await;
        self.publish_stats();
        info!("scheduler loop stopped");
    }

    /// Drain pending commands, then run exactly one pass.
    ///
    /// Errors are logged; the loop state stays consistent either way.
    pub async fn run_once(&mut self) {
        self.drain_commands();
        if self.quit {
            return;
        }

        self.dispatch_terminations();

        if let Err(e) = self.check_running().await {
            error!(error = %e, "health check failed");
        }
        self.dispatch_terminations();

        if self.queues.pending().is_empty() {
            debug!("scheduler triggered, but the queue is empty");
        } else if let Err(e) = self.schedule_pending().await {
            error!(error = %e, "scheduling pass aborted");
        }

        if let Some(core_limit) = &self.core_limit {
            core_limit.trigger();
        }
        self.publish_stats();
    }

    /// Wait for every teardown worker to finish and retire its execution.
    pub async fn wait_terminations(&mut self) {
        while let Some(done) = self.terminations.join_next_with_id().await {
            self.termination_done(done);
        }
        self.publish_stats();
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            self.handle_command(cmd);
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Incoming(id) => {
                let size = match self.ctx.store.execution(id) {
                    Ok(e) => e.size,
                    Err(e) => {
                        warn!(execution = id, error = %e, "incoming execution vanished");
                        return;
                    }
                };
                if !self.queues.enqueue(id, size) {
                    debug!(execution = id, "execution already queued");
                }
            }
            Command::Terminate(id) => {
                if self.queues.begin_termination(id) {
                    self.termination_reasons.entry(id).or_insert(None);
                }
            }
            Command::Trigger => {}
            Command::Quit => self.quit = true,
        }
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.stats());
    }

    // ── Termination ───────────────────────────────────────────────────────────

    /// Move `id` into the termination queue from inside the loop.
    fn begin_termination(
        &mut self,
        id: ExecutionId,
        reason: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.ctx.store.set_cleaning_up(id)?;
        if self.queues.begin_termination(id) {
            self.termination_reasons.insert(id, reason);
        }
        Ok(())
    }

    /// Spawn one teardown worker per queued termination not yet in flight.
    fn dispatch_terminations(&mut self) {
        let queued: Vec<ExecutionId> = self.queues.termination().to_vec();
        for id in queued {
            if !self.in_flight.insert(id) {
                continue;
            }
            let store = Arc::clone(&self.ctx.store);
            let backend = Arc::clone(&self.ctx.backend);
            let deployment = self.ctx.deployment_name.clone();
            let reason = self.termination_reasons.remove(&id).flatten();

            debug!(execution = id, "dispatching termination worker");
            let worker = self.terminations.spawn(async move {
                let launcher = Launcher {
                    store: store.as_ref(),
                    backend: backend.as_ref(),
                    deployment: &deployment,
                };
                if let Err(e) = launcher.terminate_execution(id, reason.as_deref()).await {
                    error!(execution = id, error = %e, "termination failed");
                }
                id
            });
            self.workers.insert(worker.id(), id);
        }
    }

    /// Retire a finished worker.  The execution of a panicked worker stays
    /// in the termination queue and is dispatched again on the next pass.
    fn termination_done(&mut self, done: Result<(TaskId, ExecutionId), JoinError>) {
        match done {
            Ok((task, id)) => {
                self.workers.remove(&task);
                self.in_flight.remove(&id);
                self.queues.finish_termination(id);
                debug!(execution = id, "termination worker finished");
            }
            Err(e) => match self.workers.remove(&e.id()) {
                Some(id) => {
                    self.in_flight.remove(&id);
                    error!(execution = id, error = %e, "termination worker panicked, will retry");
                }
                None => error!(error = %e, "unknown termination worker failed"),
            },
        }
    }

    // ── Health check ──────────────────────────────────────────────────────────

    /// Inspect every `running` execution for dead services and runtime
    /// limits.
    async fn check_running(&mut self) -> Result<(), SchedulerError> {
        let mut ids: Vec<ExecutionId> = self.queues.running().to_vec();
        ids.extend_from_slice(self.queues.pending());
        let now = epoch_secs();

        for id in ids {
            let execution = match self.ctx.store.execution(id) {
                Ok(e) => e,
                Err(e) => {
                    warn!(execution = id, error = %e, "queued execution vanished");
                    self.queues.remove(id);
                    continue;
                }
            };
            if !execution.status.is_active() {
                debug!(execution = id, status = %execution.status, "dropping finished execution");
                self.queues.remove(id);
                continue;
            }
            if !execution.is_running() {
                continue;
            }

            if let Some(dead) = execution.essential_services().find(|s| s.is_dead()) {
                if dead.monitor {
                    info!(execution = id, service = %dead.name, "monitor service exited, execution finished");
                    self.begin_termination(id, None)?;
                } else {
                    let msg = format!(
                        "essential service {} exited ({})",
                        dead.name, dead.backend_status
                    );
                    warn!(execution = id, service = %dead.name, status = %dead.backend_status, "essential service died");
                    self.begin_termination(id, Some(msg))?;
                }
                continue;
            }

            if let (Some(limit), Some(start)) = (
                self.ctx.store.quota_for(&execution.owner).runtime_limit_secs,
                execution.time_start,
            ) {
                if now.saturating_sub(start) > limit {
                    info!(execution = id, limit_secs = limit, "runtime limit exceeded");
                    self.begin_termination(id, Some(format!("runtime limit of {limit}s exceeded")))?;
                    continue;
                }
            }

            let dead_elastic: Vec<_> = execution.elastic_services().filter(|s| s.is_dead()).collect();
            if !dead_elastic.is_empty() {
                let launcher = self.launcher();
                for service in &dead_elastic {
                    info!(execution = id, service = %service.name, status = %service.backend_status, "elastic service died");
                    launcher.teardown_service(service).await?;
                }
                if self.queues.move_to_pending(id) {
                    debug!(execution = id, "execution back in the pending queue");
                }
            }
        }
        Ok(())
    }

    // ── Scheduling ────────────────────────────────────────────────────────────

    fn launcher(&self) -> Launcher<'_> {
        Launcher {
            store: self.ctx.store.as_ref(),
            backend: self.ctx.backend.as_ref(),
            deployment: &self.ctx.deployment_name,
        }
    }

    /// Inner loop: simulate and start until the queue empties or a whole
    /// round starts nothing.
    async fn schedule_pending(&mut self) -> Result<(), SchedulerError> {
        loop {
            let now = Instant::now();
            self.queues.rank(now);
            if self.queues.policy() == QueuePolicy::DynSize {
                for &id in self.queues.pending() {
                    if let Some(size) = self.queues.size(id) {
                        self.ctx.store.set_size(id, size)?;
                    }
                }
            }

            let candidates = self.queues.candidates(now);
            if candidates.is_empty() {
                debug!(pending = self.queues.pending().len(), "every pending execution is backing off");
                return Ok(());
            }

            let stats = match self.ctx.backend.platform_state().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "platform state unavailable, pass aborted");
                    return Ok(());
                }
            };

            let mut jobs: Vec<Execution> = Vec::with_capacity(candidates.len());
            for id in candidates {
                match self.ctx.store.execution(id) {
                    Ok(e) if e.status == ExecutionStatus::CleaningUp => {
                        debug!(execution = id, "termination requested, not starting");
                    }
                    Ok(e) if e.status.is_active() => {
                        self.queues.mark_attempted(id, now);
                        jobs.push(e);
                    }
                    Ok(e) => {
                        debug!(execution = id, status = %e.status, "dropping finished execution");
                        self.queues.remove(id);
                    }
                    Err(e) => {
                        warn!(execution = id, error = %e, "queued execution vanished");
                        self.queues.remove(id);
                    }
                }
            }

            let mut snapshot = ClusterSnapshot::new(&stats, self.config.placement);
            debug!(snapshot = %snapshot, "cluster snapshot");
            let to_launch = simulate(&mut snapshot, &jobs);
            let allocation = snapshot.get_service_allocation();
            debug!(allocation = ?allocation, launch = to_launch.len(), "allocation after simulation");

            let mut started_any = false;
            for idx in to_launch {
                if self.launch(&jobs[idx], &allocation, now).await? {
                    started_any = true;
                }
            }

            if self.queues.pending().is_empty() {
                debug!("empty queue, exiting inner loop");
                return Ok(());
            }
            if !started_any {
                debug!("no executions could be started, exiting inner loop");
                return Ok(());
            }
        }
    }

    /// Start what the simulation admitted for one execution.  Returns `true`
    /// if at least one container started.
    async fn launch(
        &mut self,
        job: &Execution,
        allocation: &BTreeMap<ServiceId, String>,
        now: Instant,
    ) -> Result<bool, SchedulerError> {
        let id = job.id;
        let mut started = false;

        if !job.essential_services_running() {
            let outcome = self.launcher().start_essential(job, allocation).await?;
            match outcome {
                StartOutcome::Ok => {
                    self.ctx.store.set_running(id)?;
                    self.queues.clear_backoff(id);
                    info!(execution = id, name = %job.name, "execution running");
                    started = true;
                }
                StartOutcome::Retry(msg) => {
                    let current = self.ctx.store.execution(id)?;
                    self.launcher().teardown_services(&current).await?;
                    self.ctx.store.set_error_message(id, &msg)?;
                    self.ctx.store.set_scheduled(id)?;
                    let delay = self.queues.record_retry(
                        id,
                        now,
                        self.config.retry_base,
                        self.config.retry_max,
                    );
                    warn!(execution = id, reason = %msg, retry_in_ms = delay.as_millis() as u64, "start failed temporarily, requeued");
                    return Ok(false);
                }
                StartOutcome::Fatal(msg) => {
                    let current = self.ctx.store.execution(id)?;
                    self.launcher().teardown_services(&current).await?;
                    self.ctx.store.set_error(id, &msg)?;
                    self.queues.remove(id);
                    error!(execution = id, reason = %msg, "execution failed to start");
                    return Ok(false);
                }
            }
        }

        let current = self.ctx.store.execution(id)?;
        if self.launcher().start_elastic(&current, allocation).await? > 0 {
            started = true;
        }

        let current = self.ctx.store.execution(id)?;
        if current.all_services_running() && self.queues.move_to_running(id) {
            debug!(execution = id, "all services started");
        }
        Ok(started)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Placement simulation
// ─────────────────────────────────────────────────────────────────────────────

/// Walk `jobs` in rank order against `snapshot` and return the indices of
/// the executions to launch.
///
/// Elastic placements are provisional: before each execution is considered,
/// the elastic services of everything accepted so far are removed, the new
/// execution's essential services are placed, and all elastic services are
/// placed again.  Aggregate free memory decides whether the execution stays:
///
/// * it went **up**: the round displaced more elastic capacity than it
///   added, so the execution is dropped;
/// * it stayed **equal** and no placement was added: the execution is
///   neutral and is not launched;
/// * otherwise the execution is kept.
///
/// A dropped execution's placements are removed and the elastic services
/// of the accepted executions are placed again.
///
/// Already running executions never need essential placement; they are
/// considered only for their elastic services.
pub fn simulate(snapshot: &mut ClusterSnapshot, jobs: &[Execution]) -> Vec<usize> {
    let mut to_launch: Vec<usize> = Vec::new();
    let mut free = snapshot.aggregate_free_memory();

    for (idx, job) in jobs.iter().enumerate() {
        let placements_before = snapshot.placement_count();

        for &j in &to_launch {
            snapshot.deallocate_elastic(&jobs[j]);
        }

        let can_start = job.is_running() || snapshot.allocate_essential(job);
        if can_start {
            to_launch.push(idx);
        }

        for &j in &to_launch {
            snapshot.allocate_elastic(&jobs[j]);
        }

        let current = snapshot.aggregate_free_memory();
        let neutral = current == free && snapshot.placement_count() <= placements_before;

        if current > free || neutral {
            if can_start {
                to_launch.pop();
            }
            snapshot.deallocate_essential(job);
            snapshot.deallocate_elastic(job);
            for &j in &to_launch {
                snapshot.deallocate_elastic(&jobs[j]);
                snapshot.allocate_elastic(&jobs[j]);
            }
            debug!(
                execution = job.id,
                free_before = free,
                free_after = current,
                "execution does not improve the allocation, skipped"
            );
            free = snapshot.aggregate_free_memory();
            continue;
        }

        if !can_start {
            debug!(execution = job.id, "essential services do not fit");
        }
        free = current;
    }
    to_launch
}

// ── Tests ─────────────────────────────────────────────────────────────────────
