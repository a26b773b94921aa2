/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core execution / service data structures.
//!
//! Two entities model a user's request to run an application:
//!
//! ```text
//! ApplicationDescription ──(digest)──►  Execution  ──owns 1:N──►  Service
//!                                        ↑ status machine          ↑ status + backend_status
//! ```
//!
//! # Ownership model
//! The persistence layer ([`crate::state::StateStore`]) owns the canonical
//! copy of every `Execution` and `Service`.  The scheduler and the other
//! background loops only ever hold **clones** taken at the start of a pass;
//! every mutation goes back through the store's field-level setters.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::app::ApplicationDescription;

/// Identifier of an [`Execution`].
pub type ExecutionId = u64;

/// Identifier of a [`Service`].
pub type ServiceId = u64;

/// Current wall-clock time as seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Execution status ──────────────────────────────────────────────────────────

/// Lifecycle of an [`Execution`].
///
/// ```text
/// submitted → scheduled → starting → running → cleaning-up → terminated
///                 │           │
///                 └───────────┴──► error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Submitted,
    Scheduled,
    Starting,
    Running,
    CleaningUp,
    Terminated,
    Error,
}

impl ExecutionStatus {
    /// Wire / log representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Submitted => "submitted",
            ExecutionStatus::Scheduled => "scheduled",
            ExecutionStatus::Starting => "starting",
            ExecutionStatus::Running => "running",
            ExecutionStatus::CleaningUp => "cleaning-up",
            ExecutionStatus::Terminated => "terminated",
            ExecutionStatus::Error => "error",
        }
    }

    /// `true` while the execution still holds (or may soon hold) cluster
    /// resources.
    pub fn is_active(self) -> bool {
        !matches!(self, ExecutionStatus::Terminated | ExecutionStatus::Error)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Service status ────────────────────────────────────────────────────────────

/// Scheduler-side lifecycle of a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceStatus {
    Created,
    Starting,
    Active,
    Error,
    Terminating,
    Inactive,
}

impl ServiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Created => "created",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Active => "active",
            ServiceStatus::Error => "error",
            ServiceStatus::Terminating => "terminating",
            ServiceStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the container as reported by the backend runtime.
///
/// Written only by the backend-status synchronizer and by the launch /
/// teardown paths; the scheduler treats it as read-only input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendStatus {
    #[default]
    Undefined,
    Created,
    Started,
    Died,
    Destroyed,
    OomKilled,
}

impl BackendStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendStatus::Undefined => "undefined",
            BackendStatus::Created => "created",
            BackendStatus::Started => "started",
            BackendStatus::Died => "died",
            BackendStatus::Destroyed => "destroyed",
            BackendStatus::OomKilled => "oom-killed",
        }
    }

    /// `true` if the container is gone without having been asked to stop.
    pub fn is_dead(self) -> bool {
        matches!(self, BackendStatus::Died | BackendStatus::OomKilled)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Resources ─────────────────────────────────────────────────────────────────

/// A `min`/`max` pair for one resource dimension.
///
/// The scheduler places on `min`; `max` is the ceiling the core-limit
/// adjuster may raise a soft limit to.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRange<T> {
    pub min: T,
    pub max: T,
}

impl<T: Copy> ResourceRange<T> {
    /// Range with `min == max`.
    pub fn fixed(value: T) -> Self {
        Self {
            min: value,
            max: value,
        }
    }
}

/// Per-service resource reservation.
///
/// Memory is in bytes, cores are fractional CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceReservation {
    pub cores: ResourceRange<f64>,
    pub memory: ResourceRange<u64>,
}

/// Where a service actually runs, filled after a successful spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Node name the backend started the container on.
    pub backend_host: String,
    /// Backend-specific container identifier.
    pub backend_id: String,
    pub ip_address: Option<String>,
}

// ── Service ───────────────────────────────────────────────────────────────────

/// One container slot of a service group inside an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub execution_id: ExecutionId,

    /// Unique name within the execution (`<group><index>`).
    pub name: String,

    /// Name of the service group this replica was digested from.
    pub group: String,

    /// Essential services must run for the execution to be up; elastic ones
    /// are optional scale-out replicas.
    pub essential: bool,

    /// When a monitor service exits, the execution has finished its work.
    pub monitor: bool,

    /// Lower values start first within one start attempt.
    pub startup_order: u32,

    pub image: String,

    /// Node labels this service requires.
    pub labels: BTreeSet<String>,

    pub ports: Vec<u16>,

    /// Environment variables; values may contain `{placeholder}` templates.
    pub environment: Vec<(String, String)>,

    pub reservation: ResourceReservation,

    pub status: ServiceStatus,
    pub backend_status: BackendStatus,
    pub placement: Option<Placement>,

    /// Soft CPU quota set by the core-limit adjuster, if any.
    pub soft_core_limit: Option<f64>,

    pub error_message: Option<String>,
}

impl Service {
    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }

    /// Active according to the scheduler but reported dead by the backend.
    pub fn is_dead(&self) -> bool {
        self.is_active() && self.backend_status.is_dead()
    }

    /// `true` if this service is running and does not need a placement.
    pub fn is_placed_and_alive(&self) -> bool {
        self.is_active() && !self.backend_status.is_dead()
    }
}

// ── Execution ─────────────────────────────────────────────────────────────────

/// A user's request to run one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,

    /// User that submitted the execution.
    pub owner: String,

    pub name: String,

    /// Raw application description the services were digested from.
    pub description: ApplicationDescription,

    pub status: ExecutionStatus,

    /// Declared size / priority hint, used by the size-aware queue policies.
    pub size: f64,

    pub time_submit: u64,
    pub time_start: Option<u64>,
    pub time_end: Option<u64>,

    pub error_message: Option<String>,

    pub services: Vec<Service>,
}

impl Execution {
    pub fn essential_services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter().filter(|s| s.essential)
    }

    pub fn elastic_services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter().filter(|s| !s.essential)
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// All essential services are active.
    pub fn essential_services_running(&self) -> bool {
        self.essential_services().all(Service::is_active)
    }

    /// Every service is either active or, for elastic services, has failed
    /// permanently and is no longer worth re-simulating.
    pub fn all_services_running(&self) -> bool {
        self.services.iter().all(|s| {
            s.is_placed_and_alive() || (!s.essential && s.status == ServiceStatus::Error)
        })
    }

    pub fn services_count(&self) -> usize {
        self.services.len()
    }

    pub fn running_services_count(&self) -> usize {
        self.services.iter().filter(|s| s.is_active()).count()
    }

    /// Sum of minimum reservations over every service: `(cores, memory_bytes)`.
    pub fn total_reservations(&self) -> (f64, u64) {
        self.services.iter().fold((0.0, 0), |(cores, mem), s| {
            (
                cores + s.reservation.cores.min,
                mem + s.reservation.memory.min,
            )
        })
    }

    pub fn service(&self, id: ServiceId) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Bare service with the given reservation; elastic unless `essential`.
    pub(crate) fn service(
        id: ServiceId,
        execution_id: ExecutionId,
        essential: bool,
        cores: f64,
        memory: u64,
    ) -> Service {
        Service {
            id,
            execution_id,
            name: format!("svc{id}"),
            group: "svc".into(),
            essential,
            monitor: false,
            startup_order: 0,
            image: "repo/app:1.0".into(),
            labels: BTreeSet::new(),
            ports: vec![],
            environment: vec![],
            reservation: ResourceReservation {
                cores: ResourceRange::fixed(cores),
                memory: ResourceRange::fixed(memory),
            },
            status: ServiceStatus::Created,
            backend_status: BackendStatus::Undefined,
            placement: None,
            soft_core_limit: None,
            error_message: None,
        }
    }

    pub(crate) fn execution(id: ExecutionId, services: Vec<Service>) -> Execution {
        Execution {
            id,
            owner: "alice".into(),
            name: format!("exec{id}"),
            description: ApplicationDescription::default(),
            status: ExecutionStatus::Scheduled,
            size: 1.0,
            time_submit: 0,
            time_start: None,
            time_end: None,
            error_message: None,
            services,
        }
    }

    // ── Status enums ──────────────────────────────────────────────────────────

    #[test]
    fn execution_status_active_set() {
        assert!(ExecutionStatus::Scheduled.is_active());
        assert!(ExecutionStatus::CleaningUp.is_active());
        assert!(!ExecutionStatus::Terminated.is_active());
        assert!(!ExecutionStatus::Error.is_active());
    }

    #[test]
    fn backend_status_dead_states() {
        assert!(BackendStatus::Died.is_dead());
        assert!(BackendStatus::OomKilled.is_dead());
        assert!(!BackendStatus::Started.is_dead());
        assert!(!BackendStatus::Destroyed.is_dead());
    }

    #[test]
    fn status_strings_are_kebab_case() {
        assert_eq!(ExecutionStatus::CleaningUp.to_string(), "cleaning-up");
        assert_eq!(BackendStatus::OomKilled.to_string(), "oom-killed");
        assert_eq!(ServiceStatus::Active.to_string(), "active");
    }

    // ── Service ───────────────────────────────────────────────────────────────

    #[test]
    fn dead_requires_active_status() {
        let mut s = service(1, 1, true, 1.0, 1);
        s.backend_status = BackendStatus::Died;
        assert!(!s.is_dead(), "inactive service is not 'dead', just stopped");
        s.status = ServiceStatus::Active;
        assert!(s.is_dead());
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    #[test]
    fn total_reservations_sums_minimums() {
        let mut big = service(2, 1, false, 2.0, 400);
        big.reservation.cores.max = 8.0;
        let e = execution(1, vec![service(1, 1, true, 1.5, 100), big]);
        assert_eq!(e.total_reservations(), (3.5, 500));
    }

    #[test]
    fn essential_and_elastic_partition_services() {
        let e = execution(
            1,
            vec![
                service(1, 1, true, 1.0, 1),
                service(2, 1, false, 1.0, 1),
                service(3, 1, false, 1.0, 1),
            ],
        );
        assert_eq!(e.essential_services().count(), 1);
        assert_eq!(e.elastic_services().count(), 2);
    }

    #[test]
    fn all_services_running_tolerates_failed_elastic() {
        let mut ess = service(1, 1, true, 1.0, 1);
        ess.status = ServiceStatus::Active;
        ess.backend_status = BackendStatus::Started;
        let mut ela = service(2, 1, false, 1.0, 1);
        ela.status = ServiceStatus::Error;

        let e = execution(1, vec![ess.clone(), ela]);
        assert!(e.all_services_running());

        let mut failed_essential = ess;
        failed_essential.status = ServiceStatus::Error;
        let e = execution(1, vec![failed_essential]);
        assert!(!e.all_services_running());
    }

    #[test]
    fn running_services_count_only_counts_active() {
        let mut a = service(1, 1, true, 1.0, 1);
        a.status = ServiceStatus::Active;
        let e = execution(1, vec![a, service(2, 1, false, 1.0, 1)]);
        assert_eq!(e.running_services_count(), 1);
        assert_eq!(e.services_count(), 2);
    }
}
