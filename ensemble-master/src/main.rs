/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use ensemble_master::backend::build_backend;
use ensemble_master::cluster::PlacementPolicy;
use ensemble_master::config::MasterConfig;
use ensemble_master::core_limit::CoreLimitAdjuster;
use ensemble_master::recovery::recover;
use ensemble_master::scheduler::{QueuePolicy, Scheduler, SchedulerContext};
use ensemble_master::state::{MemoryStore, StateStore};
use ensemble_master::synchronizer::StatusSynchronizer;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Ensemble master: elastic container scheduler.
///
/// Example:
///   ensemble-master --config configs/master.yaml --policy DYNSIZE
#[derive(Debug, Parser)]
#[command(
    name = "ensemble-master",
    about = "Ensemble master – elastic container scheduler",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML master configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Queue ranking policy (FIFO, SIZE, DYNSIZE); overrides the file.
    #[arg(long = "policy")]
    policy: Option<String>,

    /// Placement policy (random, waterfill, average); overrides the file.
    #[arg(long = "placement")]
    placement: Option<String>,

    /// Deployment name used in container names; overrides the file.
    #[arg(short = 'd', long = "deployment-name")]
    deployment_name: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=info).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    info!("Ensemble master starting up...");

    let cli = Cli::parse();
    info!(
        config          = ?cli.config,
        policy          = ?cli.policy,
        placement       = ?cli.placement,
        deployment_name = ?cli.deployment_name,
        "Command line"
    );

    // ── Load configuration ────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) if path.exists() => match MasterConfig::load_from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load configuration: {:#}", e);
                process::exit(1);
            }
        },
        Some(path) => {
            warn!(
                "Configuration file {} not found, using default settings",
                path.display()
            );
            MasterConfig::default()
        }
        None => {
            warn!("No configuration file provided, using default settings");
            MasterConfig::default()
        }
    };

    if let Some(name) = &cli.policy {
        match QueuePolicy::from_name(name) {
            Some(p) => config.scheduler.policy = p,
            None => {
                error!("Unknown scheduler policy '{}' (valid: FIFO, SIZE, DYNSIZE)", name);
                process::exit(1);
            }
        }
    }
    if let Some(name) = &cli.placement {
        config.scheduler.placement = PlacementPolicy::from_name(name);
    }
    if let Some(name) = cli.deployment_name {
        config.deployment_name = name;
    }

    info!(
        deployment = %config.deployment_name,
        backend    = %config.backend,
        policy     = %config.scheduler.policy,
        placement  = %config.scheduler.placement,
        nodes      = config.nodes.len(),
        "Effective configuration"
    );
    for node in &config.nodes {
        info!(
            "  [{name}]  cores={cores}  memory={mem}MB  labels={labels:?}  online={online}",
            name = node.name,
            cores = node.cores,
            mem = node.memory / (1024 * 1024),
            labels = node.labels,
            online = node.online,
        );
    }

    // ── Wire components ───────────────────────────────────────────────────────
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new(config.quotas.clone()));
    let backend = build_backend(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (mut scheduler, handle) = Scheduler::new(
        SchedulerContext {
            store: Arc::clone(&store),
            backend: Arc::clone(&backend),
            deployment_name: config.deployment_name.clone(),
        },
        config.scheduler.clone(),
    );

    let mut workers = Vec::new();

    if config.core_limit.enabled {
        let (adjuster, core_limit) =
            CoreLimitAdjuster::new(Arc::clone(&store), Arc::clone(&backend), &config.core_limit);
        scheduler = scheduler.with_core_limit(core_limit);
        workers.push(tokio::spawn(adjuster.run(shutdown_rx.clone())));
    } else {
        info!("Core-limit adjuster disabled");
    }

    let synchronizer = StatusSynchronizer::new(
        Arc::clone(&store),
        Arc::clone(&backend),
        handle.clone(),
        config.synchronizer_interval,
    );
    workers.push(tokio::spawn(synchronizer.run(shutdown_rx)));

    recover(store.as_ref(), &handle);
    let scheduler_task = tokio::spawn(scheduler.run());

    info!("Ensemble master ready");

    // ── Wait for shutdown ─────────────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");

    handle.quit();
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Background task failed: {}", e);
        }
    }

    let stats = handle.stats();
    info!(
        pending = stats.queue_length,
        running = stats.running_length,
        "Ensemble master stopped"
    );
}
