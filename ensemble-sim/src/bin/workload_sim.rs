/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! workload-sim – drives the Ensemble scheduler pass by pass.
//!
//! Reads a master configuration (cluster nodes, quotas, policies) and a
//! workload file, submits every application through admission control, then
//! runs scheduling passes against the simulated backend.  Between passes it
//! can kill named services to exercise the health check.
//!
//! Workload file layout:
//! ```yaml
//! submissions:
//!   - owner: alice
//!     count: 2
//!     application:
//!       name: spark
//!       size: 600
//!       services:
//!         - { name: master, image: "spark/master:2.4", total_count: 1, essential_count: 1 }
//! kills:
//!   - { after_pass: 2, execution: 1, service: master0, status: died }
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use ensemble_master::admission::admit;
use ensemble_master::app::ApplicationDescription;
use ensemble_master::backend::SimulatedBackend;
use ensemble_master::config::MasterConfig;
use ensemble_master::core_limit::CoreLimitAdjuster;
use ensemble_master::model::{BackendStatus, ExecutionId, ExecutionStatus};
use ensemble_master::scheduler::{Scheduler, SchedulerContext, SchedulerStats};
use ensemble_master::state::{MemoryStore, StateStore};
use ensemble_master::synchronizer::StatusSynchronizer;

// ── Workload file ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Workload {
    submissions: Vec<Submission>,
    kills: Vec<Kill>,
}

#[derive(Debug, Deserialize)]
struct Submission {
    owner: String,
    #[serde(default = "one")]
    count: u32,
    application: ApplicationDescription,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct Kill {
    after_pass: u32,
    execution: ExecutionId,
    service: String,
    #[serde(default = "died")]
    status: BackendStatus,
}

fn died() -> BackendStatus {
    BackendStatus::Died
}

impl Workload {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open workload file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid workload file: {}", path.display()))
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

const ALL_STATUSES: [ExecutionStatus; 7] = [
    ExecutionStatus::Submitted,
    ExecutionStatus::Scheduled,
    ExecutionStatus::Starting,
    ExecutionStatus::Running,
    ExecutionStatus::CleaningUp,
    ExecutionStatus::Terminated,
    ExecutionStatus::Error,
];

#[derive(Debug, Serialize)]
struct ExecutionSummary {
    id: ExecutionId,
    owner: String,
    name: String,
    status: ExecutionStatus,
    running_services: usize,
    services: usize,
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct Report {
    passes: u32,
    scheduler: SchedulerStats,
    executions: Vec<ExecutionSummary>,
}

// ── CLI argument definition ───────────────────────────────────────────────────

/// Workload simulator for the Ensemble scheduler.
///
/// Example:
///   workload-sim --config configs/master.yaml --workload configs/workload.yaml --passes 5
#[derive(Debug, Parser)]
#[command(name = "workload-sim", long_about = None)]
struct Cli {
    /// Master configuration (nodes, quotas, policies).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Workload YAML file.
    #[arg(short = 'w', long = "workload")]
    workload: PathBuf,

    /// Number of scheduling passes to run.
    #[arg(short = 'n', long = "passes", default_value_t = 5)]
    passes: u32,

    /// Pause between passes, in milliseconds.
    #[arg(long = "pause-ms", default_value_t = 0)]
    pause_ms: u64,

    /// Terminate every execution after the last pass.
    #[arg(long = "terminate-all", default_value_t = false)]
    terminate_all: bool,

    /// Print the final report as JSON instead of log lines.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("workload-sim failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => MasterConfig::load_from_file(path)?,
        None => {
            warn!("No configuration file provided, using default settings");
            MasterConfig::default()
        }
    };
    let workload = Workload::load(&cli.workload)?;

    let store = Arc::new(MemoryStore::new(config.quotas.clone()));
    let backend = Arc::new(SimulatedBackend::new(&config.nodes));
    let (mut scheduler, handle) = Scheduler::new(
        SchedulerContext {
            store: store.clone(),
            backend: backend.clone(),
            deployment_name: config.deployment_name.clone(),
        },
        config.scheduler.clone(),
    );
    let synchronizer = StatusSynchronizer::new(
        store.clone(),
        backend.clone(),
        handle.clone(),
        config.synchronizer_interval,
    );
    let (core_limit, _core_limit_handle) =
        CoreLimitAdjuster::new(store.clone(), backend.clone(), &config.core_limit);

    // ── Submit ────────────────────────────────────────────────────────────────
    let mut admitted = 0;
    for submission in &workload.submissions {
        for _ in 0..submission.count {
            let execution =
                store.create_execution(&submission.owner, submission.application.clone());
            match admit(store.as_ref(), execution.id, &handle) {
                Ok(()) => admitted += 1,
                Err(e) if e.is_rejection() => {
                    info!(execution = execution.id, owner = %submission.owner, reason = %e, "rejected");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    info!(admitted, "workload submitted");

    // ── Passes ────────────────────────────────────────────────────────────────
    for pass in 1..=cli.passes {
        scheduler.run_once().await;
        scheduler.wait_terminations().await;
        synchronizer.sync_once().await;
        if config.core_limit.enabled {
            if let Err(e) = core_limit.adjust_once().await {
                warn!(error = %e, "core-limit round skipped");
            }
        }

        let stats = scheduler.stats();
        info!(
            pass,
            pending = stats.queue_length,
            running = stats.running_length,
            terminating = stats.termination_queue_length,
            containers = backend.running_count(),
            "pass complete"
        );

        for kill in workload.kills.iter().filter(|k| k.after_pass == pass) {
            apply_kill(store.as_ref(), &backend, kill);
        }
        synchronizer.sync_once().await;

        if cli.pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cli.pause_ms)).await;
        }
    }

    if cli.terminate_all {
        let stats = scheduler.stats();
        for id in stats.queue.iter().chain(&stats.running_queue) {
            handle.terminate(*id)?;
        }
        scheduler.run_once().await;
        scheduler.wait_terminations().await;
        info!(containers = backend.running_count(), "all executions terminated");
    }

    // ── Report ────────────────────────────────────────────────────────────────
    let executions: Vec<ExecutionSummary> = store
        .executions_by_status(&ALL_STATUSES)
        .into_iter()
        .map(|e| ExecutionSummary {
            id: e.id,
            running_services: e.running_services_count(),
            services: e.services_count(),
            owner: e.owner,
            name: e.name,
            status: e.status,
            error_message: e.error_message,
        })
        .collect();
    let report = Report {
        passes: cli.passes,
        scheduler: scheduler.stats(),
        executions,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for e in &report.executions {
            info!(
                "  [{id}] {name:<16} owner={owner:<8} status={status:<12} services={run}/{total}{err}",
                id = e.id,
                name = e.name,
                owner = e.owner,
                status = e.status.as_str(),
                run = e.running_services,
                total = e.services,
                err = e
                    .error_message
                    .as_deref()
                    .map(|m| format!("  error=\"{m}\""))
                    .unwrap_or_default(),
            );
        }
    }
    Ok(())
}

fn apply_kill(store: &dyn StateStore, backend: &SimulatedBackend, kill: &Kill) {
    let service = store
        .execution(kill.execution)
        .ok()
        .and_then(|e| e.services.into_iter().find(|s| s.name == kill.service));
    match service {
        Some(s) if backend.kill_service(s.id, kill.status) => {
            info!(execution = kill.execution, service = %kill.service, status = %kill.status, "service killed");
        }
        Some(_) => warn!(execution = kill.execution, service = %kill.service, "service has no container"),
        None => warn!(execution = kill.execution, service = %kill.service, "no such service"),
    }
}
