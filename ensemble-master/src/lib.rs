/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Ensemble master – elastic container scheduler
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── model         – executions, services, status machines
//! ├── app           – application descriptions and their digestion
//! ├── stats         – cluster resource snapshots reported by the backend
//! ├── cluster/      – simulated cluster + placement policies
//! ├── scheduler/    – queues, scheduling loop, launch / teardown
//! ├── backend/      – backend contract, service instances, simulated backend
//! ├── state/        – persistence contract + in-memory store
//! ├── config/       – YAML master configuration
//! ├── admission     – per-user quota checks
//! ├── core_limit    – soft CPU limit redistribution
//! ├── synchronizer  – backend status polling
//! └── recovery      – re-enqueue unfinished work after a restart
//! ```

pub mod admission;
pub mod app;
pub mod backend;
pub mod cluster;
pub mod config;
pub mod core_limit;
pub mod model;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod synchronizer;
