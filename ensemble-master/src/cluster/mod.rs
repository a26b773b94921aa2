//! Disposable cluster snapshot used to simulate placements.
//!
//! A [`ClusterSnapshot`] is rebuilt from the latest [`ClusterStats`] at the
//! start of every scheduling pass and dropped at its end.  Services are only
//! *tentatively* placed on [`SimulatedNode`]s; nothing here touches the real
//! backend.  The final tentative mapping is handed to the backend as a
//! placement hint.
//!
//! # Invariant
//! [`SimulatedNode::add`] only accepts a service that fits, so free memory
//! and free cores never go negative through this API.  If they do anyway
//! (real reservations drifted below zero) a warning is logged and the
//! negative value is returned as-is.

pub mod placement;

pub use placement::{Candidate, PlacementPolicy};

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::model::{Execution, Service, ServiceId, ServiceStatus};
use crate::stats::{ClusterStats, NodeStats};

// ── Unfit reasons ─────────────────────────────────────────────────────────────

/// Why a service cannot be placed on a node.
///
/// Variants are produced in the same order [`SimulatedNode::service_fits`]
/// evaluates its predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum UnfitReason {
    /// The node does not exist in this snapshot (offline or unknown).
    UnknownNode { node: String },

    /// The node carries the `disabled` label.
    NodeDisabled,

    /// The service requires labels the node lacks.
    LabelMismatch { missing: Vec<String> },

    /// Minimum memory is not strictly below the node's free memory.
    InsufficientMemory { required: u64, free: i64 },

    /// Minimum cores exceed the node's free cores.
    InsufficientCores { required: f64, free: f64 },

    /// The image is not present on the node.
    ImageUnavailable { image: String },
}

impl fmt::Display for UnfitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnfitReason::UnknownNode { node } => {
                write!(f, "node '{}' is not part of the snapshot", node)
            }
            UnfitReason::NodeDisabled => write!(f, "node is administratively disabled"),
            UnfitReason::LabelMismatch { missing } => write!(
                f,
                "label mismatch: node lacks required labels {:?}",
                missing
            ),
            UnfitReason::InsufficientMemory { required, free } => write!(
                f,
                "service requires {} bytes of memory but node only has {} free",
                required, free
            ),
            UnfitReason::InsufficientCores { required, free } => write!(
                f,
                "service requires {:.2} cores but node only has {:.2} free",
                required, free
            ),
            UnfitReason::ImageUnavailable { image } => {
                write!(f, "image '{}' is not available on node", image)
            }
        }
    }
}

// ── SimulatedNode ─────────────────────────────────────────────────────────────

/// Minimal copy of a tentatively placed service.
#[derive(Debug, Clone, PartialEq)]
struct Tentative {
    id: ServiceId,
    cores: f64,
    memory: u64,
}

/// A copy of one node's stats plus the services tentatively placed on it.
#[derive(Debug, Clone)]
pub struct SimulatedNode {
    stats: NodeStats,
    services: Vec<Tentative>,
}

impl SimulatedNode {
    fn new(stats: NodeStats) -> Self {
        Self {
            stats,
            services: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.stats.name
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Real containers plus tentatively placed services.
    pub fn container_count(&self) -> usize {
        self.stats.container_count + self.services.len()
    }

    /// Real free memory minus tentative reservations, in bytes.
    pub fn free_memory(&self) -> i64 {
        let simulated: u64 = self.services.iter().map(|s| s.memory).sum();
        let free = self
            .stats
            .memory_free()
            .saturating_sub(i64::try_from(simulated).unwrap_or(i64::MAX));
        if free < 0 {
            warn!(
                node = %self.stats.name,
                free_memory = free,
                "simulated free memory is negative"
            );
        }
        free
    }

    /// Real free cores minus tentative reservations.
    pub fn free_cores(&self) -> f64 {
        let simulated: f64 = self.services.iter().map(|s| s.cores).sum();
        let free = self.stats.cores_free() - simulated;
        if free < 0.0 {
            warn!(
                node = %self.stats.name,
                free_cores = free,
                "simulated free cores are negative"
            );
        }
        free
    }

    /// First failing placement predicate, or `None` if the service fits.
    pub fn why_unfit(&self, service: &Service) -> Option<UnfitReason> {
        if self.stats.is_disabled() {
            return Some(UnfitReason::NodeDisabled);
        }

        let missing: Vec<String> = service
            .labels
            .difference(&self.stats.labels)
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Some(UnfitReason::LabelMismatch { missing });
        }

        let free_memory = self.free_memory();
        let required = i64::try_from(service.reservation.memory.min).unwrap_or(i64::MAX);
        if required >= free_memory {
            return Some(UnfitReason::InsufficientMemory {
                required: service.reservation.memory.min,
                free: free_memory,
            });
        }

        let free_cores = self.free_cores();
        if service.reservation.cores.min > free_cores {
            return Some(UnfitReason::InsufficientCores {
                required: service.reservation.cores.min,
                free: free_cores,
            });
        }

        if !self.stats.has_image(&service.image) {
            return Some(UnfitReason::ImageUnavailable {
                image: service.image.clone(),
            });
        }

        None
    }

    pub fn service_fits(&self, service: &Service) -> bool {
        self.why_unfit(service).is_none()
    }

    /// Tentatively place `service`.  No side effect if it does not fit.
    pub fn add(&mut self, service: &Service) -> bool {
        if !self.service_fits(service) {
            return false;
        }
        self.services.push(Tentative {
            id: service.id,
            cores: service.reservation.cores.min,
            memory: service.reservation.memory.min,
        });
        true
    }

    /// Drop a tentative placement.  Returns whether anything was removed.
    pub fn remove(&mut self, service_id: ServiceId) -> bool {
        match self.services.iter().position(|s| s.id == service_id) {
            Some(idx) => {
                self.services.remove(idx);
                true
            }
            None => false,
        }
    }

    fn holds(&self, service_id: ServiceId) -> bool {
        self.services.iter().any(|s| s.id == service_id)
    }
}

impl fmt::Display for SimulatedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | mem free {} | cores free {:.2} | tentative {}",
            self.stats.name,
            self.free_memory(),
            self.free_cores(),
            self.services.len()
        )
    }
}

// ── ClusterSnapshot ───────────────────────────────────────────────────────────

/// The simulated cluster for one scheduling pass.
///
/// `BTreeMap` keeps node iteration alphabetical so candidate order, and thus
/// tie-breaking in the placement policies, is deterministic.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    nodes: BTreeMap<String, SimulatedNode>,
    policy: PlacementPolicy,
}

impl ClusterSnapshot {
    /// Build one simulated node per **online** node of `stats`.
    pub fn new(stats: &ClusterStats, policy: PlacementPolicy) -> Self {
        let nodes = stats
            .nodes
            .iter()
            .filter(|n| n.online)
            .map(|n| (n.name.clone(), SimulatedNode::new(n.clone())))
            .collect();
        Self { nodes, policy }
    }

    pub fn node(&self, name: &str) -> Option<&SimulatedNode> {
        self.nodes.get(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn service_fits(&self, node: &str, service: &Service) -> bool {
        self.nodes
            .get(node)
            .map_or(false, |n| n.service_fits(service))
    }

    /// Human-readable explanation of why `service` does not fit on `node`.
    ///
    /// Returns an empty string when it does fit.
    pub fn service_why_unfit(&self, node: &str, service: &Service) -> String {
        let reason = match self.nodes.get(node) {
            Some(n) => n.why_unfit(service),
            None => Some(UnfitReason::UnknownNode {
                node: node.to_string(),
            }),
        };
        reason.map(|r| r.to_string()).unwrap_or_default()
    }

    pub fn add(&mut self, node: &str, service: &Service) -> bool {
        self.nodes.get_mut(node).map_or(false, |n| n.add(service))
    }

    pub fn remove(&mut self, node: &str, service_id: ServiceId) -> bool {
        self.nodes
            .get_mut(node)
            .map_or(false, |n| n.remove(service_id))
    }

    /// Free memory of `node` after tentative placements (`0` if unknown).
    pub fn free_memory(&self, node: &str) -> i64 {
        self.nodes.get(node).map_or(0, SimulatedNode::free_memory)
    }

    /// Free cores of `node` after tentative placements (`0.0` if unknown).
    pub fn free_cores(&self, node: &str) -> f64 {
        self.nodes.get(node).map_or(0.0, SimulatedNode::free_cores)
    }

    /// Sum of [`free_memory`](Self::free_memory) over all nodes.
    pub fn aggregate_free_memory(&self) -> i64 {
        self.nodes.values().map(SimulatedNode::free_memory).sum()
    }

    /// Total number of tentative placements across all nodes.
    pub fn placement_count(&self) -> usize {
        self.nodes.values().map(|n| n.services.len()).sum()
    }

    pub fn is_placed(&self, service_id: ServiceId) -> bool {
        self.nodes.values().any(|n| n.holds(service_id))
    }

    /// Place every not-yet-placed essential service of `execution`.
    ///
    /// All-or-nothing: if any essential service fits nowhere, every essential
    /// placement of this execution is rolled back and `false` is returned.
    pub fn allocate_essential(&mut self, execution: &Execution) -> bool {
        for service in execution.essential_services() {
            if service.is_placed_and_alive() || self.is_placed(service.id) {
                continue;
            }
            if !self.place(service) {
                debug!(
                    execution = execution.id,
                    service = %service.name,
                    "essential service does not fit anywhere, rolling back"
                );
                self.deallocate_essential(execution);
                return false;
            }
        }
        true
    }

    /// Remove every tentatively placed essential service of `execution`.
    pub fn deallocate_essential(&mut self, execution: &Execution) {
        for service in execution.essential_services() {
            self.remove_anywhere(service.id);
        }
    }

    /// Best-effort placement of elastic services that are not already running.
    ///
    /// Services that do not fit are skipped.  Elastic services whose last
    /// start failed fatally stay out of the simulation.  Returns `true` iff
    /// at least one service was placed.
    pub fn allocate_elastic(&mut self, execution: &Execution) -> bool {
        let mut placed_any = false;
        for service in execution.elastic_services() {
            if service.is_placed_and_alive()
                || service.status == ServiceStatus::Error
                || self.is_placed(service.id)
            {
                continue;
            }
            if self.place(service) {
                placed_any = true;
            }
        }
        placed_any
    }

    /// Remove every tentatively placed elastic service of `execution`.
    pub fn deallocate_elastic(&mut self, execution: &Execution) {
        for service in execution.elastic_services() {
            self.remove_anywhere(service.id);
        }
    }

    /// Final simulated placement: service id → node name.
    pub fn get_service_allocation(&self) -> BTreeMap<ServiceId, String> {
        let mut out = BTreeMap::new();
        for (name, node) in &self.nodes {
            for s in &node.services {
                out.insert(s.id, name.clone());
            }
        }
        out
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// Pick a node for `service` via the policy and add it there.
    fn place(&mut self, service: &Service) -> bool {
        let chosen = {
            let fitting: Vec<&SimulatedNode> = self
                .nodes
                .values()
                .filter(|n| n.service_fits(service))
                .collect();

            if fitting.is_empty() {
                for node in self.nodes.values() {
                    if let Some(reason) = node.why_unfit(service) {
                        debug!(
                            service = %service.name,
                            node = %node.name(),
                            reason = %reason,
                            "node rejected service"
                        );
                    }
                }
                return false;
            }

            let candidates: Vec<Candidate<'_>> = fitting
                .iter()
                .map(|n| Candidate {
                    name: n.name(),
                    label_count: n.stats.labels.len(),
                    container_count: n.container_count(),
                })
                .collect();

            match self.policy.select(&candidates) {
                Some(idx) => candidates[idx].name.to_string(),
                None => return false,
            }
        };

        let added = self.add(&chosen, service);
        if added {
            debug!(
                service = %service.name,
                node = %chosen,
                policy = %self.policy,
                "tentatively placed"
            );
        }
        added
    }

    fn remove_anywhere(&mut self, service_id: ServiceId) -> bool {
        self.nodes.values_mut().any(|n| n.remove(service_id))
    }
}

impl fmt::Display for ClusterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.nodes.values().map(|n| n.to_string()).collect();
        f.write_str(&parts.join(" # "))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{execution, service};
    use crate::model::BackendStatus;
    use crate::stats::tests::{node, GIB};
    use std::io;
    use std::sync::{Arc, Mutex};

    fn one_node_snapshot(cores: f64, memory: u64) -> ClusterSnapshot {
        let stats = ClusterStats::new(0, vec![node("node01", cores, memory)]);
        ClusterSnapshot::new(&stats, PlacementPolicy::Average)
    }

    // ── Construction ──────────────────────────────────────────────────────────

    #[test]
    fn offline_nodes_are_ignored() {
        let mut off = node("off", 64.0, 64 * GIB);
        off.online = false;
        let stats = ClusterStats::new(0, vec![node("on", 1.0, GIB), off]);
        let snap = ClusterSnapshot::new(&stats, PlacementPolicy::Average);
        assert_eq!(snap.node_count(), 1);
        assert!(snap.node("off").is_none());

        let s = service(1, 1, true, 1.0, 1);
        assert!(!snap.service_fits("off", &s));
        assert!(snap.service_why_unfit("off", &s).contains("not part of"));
    }

    // ── service_fits / service_why_unfit ──────────────────────────────────────

    #[test]
    fn memory_must_be_strictly_below_free() {
        let snap = one_node_snapshot(8.0, 4 * GIB);
        let exact = service(1, 1, true, 1.0, 4 * GIB);
        assert!(!snap.service_fits("node01", &exact));
        let less = service(2, 1, true, 1.0, 4 * GIB - 1);
        assert!(snap.service_fits("node01", &less));
    }

    #[test]
    fn cores_may_equal_free() {
        let snap = one_node_snapshot(2.0, 4 * GIB);
        assert!(snap.service_fits("node01", &service(1, 1, true, 2.0, 1)));
        assert!(!snap.service_fits("node01", &service(2, 1, true, 2.5, 1)));
    }

    #[test]
    fn label_mismatch_is_explained() {
        // Scenario C
        let mut gpu = node("node01", 8.0, 16 * GIB);
        gpu.labels.insert("gpu".into());
        let stats = ClusterStats::new(0, vec![gpu]);
        let snap = ClusterSnapshot::new(&stats, PlacementPolicy::Average);

        let mut s = service(1, 1, true, 1.0, GIB);
        s.labels.insert("tpu".into());

        assert!(!snap.service_fits("node01", &s));
        let why = snap.service_why_unfit("node01", &s);
        assert!(why.contains("label mismatch"), "got: {why}");
        assert!(why.contains("tpu"));
    }

    #[test]
    fn disabled_node_rejects_everything() {
        let mut n = node("node01", 8.0, 16 * GIB);
        n.labels.insert("disabled".into());
        let snap = ClusterSnapshot::new(&ClusterStats::new(0, vec![n]), PlacementPolicy::Average);
        let s = service(1, 1, true, 0.1, 1);
        assert!(!snap.service_fits("node01", &s));
        assert!(snap.service_why_unfit("node01", &s).contains("disabled"));
    }

    #[test]
    fn missing_image_rejects_service() {
        let mut n = node("node01", 8.0, 16 * GIB);
        n.images = Some(["other/img:1".to_string()].into_iter().collect());
        let snap = ClusterSnapshot::new(&ClusterStats::new(0, vec![n]), PlacementPolicy::Average);
        let s = service(1, 1, true, 1.0, GIB);
        assert!(!snap.service_fits("node01", &s));
        assert!(snap.service_why_unfit("node01", &s).contains("image"));
    }

    #[test]
    fn why_unfit_reports_first_failing_predicate() {
        // Both memory and cores are insufficient: memory is checked first.
        let snap = one_node_snapshot(1.0, GIB);
        let s = service(1, 1, true, 4.0, 2 * GIB);
        assert!(snap.service_why_unfit("node01", &s).contains("memory"));
    }

    #[test]
    fn why_unfit_is_empty_when_service_fits() {
        let snap = one_node_snapshot(8.0, 16 * GIB);
        assert_eq!(snap.service_why_unfit("node01", &service(1, 1, true, 1.0, 1)), "");
    }

    // ── add / remove ──────────────────────────────────────────────────────────

    #[test]
    fn add_rejects_unfit_without_side_effect() {
        let mut snap = one_node_snapshot(2.0, 4 * GIB);
        let before = snap.free_memory("node01");
        assert!(!snap.add("node01", &service(1, 1, true, 4.0, GIB)));
        assert_eq!(snap.free_memory("node01"), before);
        assert_eq!(snap.placement_count(), 0);
    }

    #[test]
    fn remove_reports_whether_anything_was_removed() {
        let mut snap = one_node_snapshot(8.0, 16 * GIB);
        let s = service(1, 1, true, 1.0, GIB);
        assert!(snap.add("node01", &s));
        assert!(snap.remove("node01", s.id));
        assert!(!snap.remove("node01", s.id));
    }

    #[test]
    fn free_resources_never_negative_after_successful_adds() {
        let mut snap = one_node_snapshot(4.0, 10 * GIB);
        for id in 0..20 {
            snap.add("node01", &service(id, 1, true, 0.7, GIB + 3));
            assert!(snap.free_memory("node01") >= 0);
            assert!(snap.free_cores("node01") >= 0.0);
        }
        assert!(snap.placement_count() > 0);
    }

    #[test]
    fn oversized_memory_request_does_not_wrap() {
        let snap = one_node_snapshot(8.0, 16 * GIB);
        let mut s = service(1, 1, true, 1.0, 0);
        s.reservation.memory.min = u64::MAX;
        assert!(!snap.service_fits("node01", &s));
        assert!(snap
            .service_why_unfit("node01", &s)
            .contains("memory"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn overcommitted_node_warns_instead_of_failing() {
        let mut n = node("node01", 4.0, 8 * GIB);
        n.cores_reserved = 6.0;
        n.memory_reserved = 10 * GIB;
        let mut snap = ClusterSnapshot::new(&ClusterStats::new(0, vec![n]), PlacementPolicy::Average);

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let (memory, cores, added) = tracing::subscriber::with_default(subscriber, || {
            let added = snap.add("node01", &service(1, 1, true, 1.0, GIB));
            (snap.free_memory("node01"), snap.free_cores("node01"), added)
        });

        assert_eq!(memory, -2 * GIB as i64);
        assert_eq!(cores, -2.0);
        assert!(!added);
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("simulated free memory is negative"));
        assert!(logs.contains("simulated free cores are negative"));
    }

    // ── allocate_essential ────────────────────────────────────────────────────

    #[test]
    fn simple_fit_places_essential_service() {
        // Scenario A
        let mut snap = one_node_snapshot(8.0, 16 * GIB);
        let exec = execution(1, vec![service(10, 1, true, 2.0, 4 * GIB)]);
        let before = snap.aggregate_free_memory();

        assert!(snap.allocate_essential(&exec));
        let alloc = snap.get_service_allocation();
        assert_eq!(alloc.get(&10).map(String::as_str), Some("node01"));
        assert_eq!(before - snap.aggregate_free_memory(), (4 * GIB) as i64);
    }

    #[test]
    fn no_fit_returns_false() {
        // Scenario B
        let mut snap = one_node_snapshot(8.0, 16 * GIB);
        let exec = execution(1, vec![service(10, 1, true, 10.0, GIB)]);
        assert!(!snap.allocate_essential(&exec));
        assert!(snap.get_service_allocation().is_empty());
    }

    #[test]
    fn essential_allocation_is_all_or_nothing() {
        let mut snap = one_node_snapshot(4.0, 16 * GIB);
        let exec = execution(
            1,
            vec![
                service(10, 1, true, 2.0, GIB),
                service(11, 1, true, 1.0, GIB),
                service(12, 1, true, 3.0, GIB), // does not fit after the first two
            ],
        );
        assert!(!snap.allocate_essential(&exec));
        let alloc = snap.get_service_allocation();
        for s in &exec.services {
            assert!(!alloc.contains_key(&s.id), "service {} leaked", s.id);
        }
    }

    #[test]
    fn essential_allocation_skips_already_placed_services() {
        let mut snap = one_node_snapshot(8.0, 16 * GIB);
        let exec = execution(1, vec![service(10, 1, true, 1.0, GIB)]);
        assert!(snap.allocate_essential(&exec));
        assert!(snap.allocate_essential(&exec));
        assert_eq!(snap.placement_count(), 1);
    }

    #[test]
    fn essential_allocation_follows_average_policy() {
        // Scenario D
        let mut a = node("A", 8.0, 16 * GIB);
        a.container_count = 5;
        let mut b = node("B", 8.0, 16 * GIB);
        b.container_count = 1;
        let stats = ClusterStats::new(0, vec![a, b]);
        let mut snap = ClusterSnapshot::new(&stats, PlacementPolicy::Average);

        let exec = execution(1, vec![service(10, 1, true, 1.0, GIB)]);
        assert!(snap.allocate_essential(&exec));
        assert_eq!(snap.get_service_allocation()[&10], "B");
    }

    // ── deallocate ────────────────────────────────────────────────────────────

    #[test]
    fn deallocate_is_idempotent() {
        let mut snap = one_node_snapshot(8.0, 16 * GIB);
        let exec = execution(
            1,
            vec![service(10, 1, true, 1.0, GIB), service(11, 1, false, 1.0, GIB)],
        );
        assert!(snap.allocate_essential(&exec));
        assert!(snap.allocate_elastic(&exec));
        let full = snap.aggregate_free_memory();

        snap.deallocate_elastic(&exec);
        let once = snap.aggregate_free_memory();
        snap.deallocate_elastic(&exec);
        assert_eq!(snap.aggregate_free_memory(), once);
        assert_eq!(once - full, GIB as i64);

        snap.deallocate_essential(&exec);
        let cleared = snap.aggregate_free_memory();
        snap.deallocate_essential(&exec);
        assert_eq!(snap.aggregate_free_memory(), cleared);
        assert_eq!(snap.placement_count(), 0);
    }

    // ── allocate_elastic ──────────────────────────────────────────────────────

    #[test]
    fn elastic_allocation_is_best_effort() {
        let mut snap = one_node_snapshot(4.0, 16 * GIB);
        let exec = execution(
            1,
            vec![
                service(10, 1, true, 2.0, GIB),
                service(11, 1, false, 1.0, GIB),
                service(12, 1, false, 3.0, GIB), // never fits beside the others
            ],
        );
        assert!(snap.allocate_essential(&exec));
        assert!(snap.allocate_elastic(&exec));
        let alloc = snap.get_service_allocation();
        assert!(alloc.contains_key(&10));
        assert!(alloc.contains_key(&11));
        assert!(!alloc.contains_key(&12));
    }

    #[test]
    fn elastic_starvation_does_not_block_essential() {
        let mut snap = one_node_snapshot(2.0, 16 * GIB);
        let exec = execution(
            1,
            vec![service(10, 1, true, 2.0, GIB), service(11, 1, false, 1.0, GIB)],
        );
        assert!(snap.allocate_essential(&exec));
        assert!(!snap.allocate_elastic(&exec));
        assert!(snap.get_service_allocation().contains_key(&10));
    }

    #[test]
    fn elastic_allocation_skips_live_services_but_replaces_dead_ones() {
        let mut snap = one_node_snapshot(8.0, 16 * GIB);
        let mut alive = service(11, 1, false, 1.0, GIB);
        alive.status = ServiceStatus::Active;
        alive.backend_status = BackendStatus::Started;
        let mut dead = service(12, 1, false, 1.0, GIB);
        dead.status = ServiceStatus::Active;
        dead.backend_status = BackendStatus::Died;
        let mut failed = service(13, 1, false, 1.0, GIB);
        failed.status = ServiceStatus::Error;

        let exec = execution(1, vec![alive, dead, failed]);
        assert!(snap.allocate_elastic(&exec));
        let alloc = snap.get_service_allocation();
        assert!(!alloc.contains_key(&11));
        assert!(alloc.contains_key(&12));
        assert!(!alloc.contains_key(&13));
    }

    #[test]
    fn display_lists_every_node() {
        let stats = ClusterStats::new(0, vec![node("a", 1.0, GIB), node("b", 1.0, GIB)]);
        let snap = ClusterSnapshot::new(&stats, PlacementPolicy::Average);
        let s = snap.to_string();
        assert!(s.contains("a |") && s.contains("b |"));
    }
}
