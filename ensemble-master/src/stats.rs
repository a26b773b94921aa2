/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Point-in-time cluster resource snapshots produced by the backend.
//!
//! The scheduler consumes these read-only; only the backend builds them.

use std::collections::BTreeSet;

use serde::Serialize;

/// Label that administratively removes a node from placement.
pub const DISABLED_LABEL: &str = "disabled";

/// Resources and state of one cluster node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStats {
    pub name: String,
    pub online: bool,
    pub labels: BTreeSet<String>,

    pub cores_total: f64,
    /// Sum of minimum core reservations of everything running on the node.
    pub cores_reserved: f64,

    /// Bytes.
    pub memory_total: u64,
    /// Bytes.
    pub memory_reserved: u64,

    pub container_count: usize,

    /// Images present on the node.  `None` means the backend does not track
    /// images, in which case every image counts as available.
    pub images: Option<BTreeSet<String>>,
}

impl NodeStats {
    /// Free memory in bytes; negative if the node is over-committed.
    pub fn memory_free(&self) -> i64 {
        let total = i64::try_from(self.memory_total).unwrap_or(i64::MAX);
        let reserved = i64::try_from(self.memory_reserved).unwrap_or(i64::MAX);
        total.saturating_sub(reserved)
    }

    pub fn cores_free(&self) -> f64 {
        self.cores_total - self.cores_reserved
    }

    pub fn is_disabled(&self) -> bool {
        self.labels.contains(DISABLED_LABEL)
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.images.as_ref().map_or(true, |imgs| imgs.contains(image))
    }
}

/// All nodes plus cluster-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterStats {
    /// Unix seconds at which the snapshot was taken.
    pub timestamp: u64,
    pub nodes: Vec<NodeStats>,
}

impl ClusterStats {
    pub fn new(timestamp: u64, nodes: Vec<NodeStats>) -> Self {
        Self { timestamp, nodes }
    }

    pub fn container_count(&self) -> usize {
        self.nodes.iter().map(|n| n.container_count).sum()
    }

    pub fn cores_total(&self) -> f64 {
        self.nodes.iter().map(|n| n.cores_total).sum()
    }

    pub fn memory_total(&self) -> u64 {
        self.nodes.iter().map(|n| n.memory_total).sum()
    }

    pub fn cores_reserved(&self) -> f64 {
        self.nodes.iter().map(|n| n.cores_reserved).sum()
    }

    pub fn memory_reserved(&self) -> u64 {
        self.nodes.iter().map(|n| n.memory_reserved).sum()
    }

    pub fn node(&self, name: &str) -> Option<&NodeStats> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const GIB: u64 = 1024 * 1024 * 1024;

    /// Online node with nothing reserved and no image tracking.
    pub(crate) fn node(name: &str, cores: f64, memory: u64) -> NodeStats {
        NodeStats {
            name: name.to_string(),
            online: true,
            labels: BTreeSet::new(),
            cores_total: cores,
            cores_reserved: 0.0,
            memory_total: memory,
            memory_reserved: 0,
            container_count: 0,
            images: None,
        }
    }

    #[test]
    fn free_resources_subtract_reservations() {
        let mut n = node("n1", 8.0, 16 * GIB);
        n.cores_reserved = 2.5;
        n.memory_reserved = 4 * GIB;
        assert_eq!(n.cores_free(), 5.5);
        assert_eq!(n.memory_free(), (12 * GIB) as i64);
    }

    #[test]
    fn overcommitted_node_reports_negative_memory() {
        let mut n = node("n1", 1.0, 100);
        n.memory_reserved = 150;
        assert_eq!(n.memory_free(), -50);
    }

    #[test]
    fn untracked_images_are_always_available() {
        let mut n = node("n1", 1.0, 1);
        assert!(n.has_image("anything:1"));
        n.images = Some(["a:1".to_string()].into_iter().collect());
        assert!(n.has_image("a:1"));
        assert!(!n.has_image("b:1"));
    }

    #[test]
    fn cluster_totals_aggregate_nodes() {
        let mut a = node("a", 4.0, 10);
        a.container_count = 3;
        let b = node("b", 2.0, 5);
        let stats = ClusterStats::new(0, vec![a, b]);
        assert_eq!(stats.cores_total(), 6.0);
        assert_eq!(stats.memory_total(), 15);
        assert_eq!(stats.container_count(), 3);
        assert!(stats.node("b").is_some());
    }
}
