/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-process backend that emulates a container cluster.
//!
//! Nodes come from the `nodes` configuration section.  Containers are plain
//! records; "starting" one only books its minimum reservation on a node.
//! The test hooks ([`kill_service`](SimulatedBackend::kill_service),
//! [`inject_spawn_failure`](SimulatedBackend::inject_spawn_failure),
//! [`set_unavailable`](SimulatedBackend::set_unavailable)) let callers
//! reproduce runtime failures deterministically.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Backend, BackendError, ServiceInstance};
use crate::config::NodeConfig;
use crate::model::{epoch_secs, BackendStatus, Placement, ResourceReservation, Service, ServiceId};
use crate::stats::{ClusterStats, NodeStats};

#[derive(Debug, Clone)]
struct SimContainer {
    service_id: ServiceId,
    name: String,
    image: String,
    reservation: ResourceReservation,
    status: BackendStatus,
    soft_cores: Option<f64>,
}

impl SimContainer {
    /// Dead containers no longer hold resources.
    fn holds_resources(&self) -> bool {
        self.status == BackendStatus::Started
    }
}

#[derive(Debug)]
struct SimNode {
    config: NodeConfig,
    /// backend id → container.
    containers: BTreeMap<String, SimContainer>,
}

impl SimNode {
    fn reserved(&self) -> (f64, u64) {
        self.containers
            .values()
            .filter(|c| c.holds_resources())
            .fold((0.0, 0), |(cores, mem), c| {
                (
                    cores + c.reservation.cores.min,
                    mem + c.reservation.memory.min,
                )
            })
    }

    fn has_image(&self, image: &str) -> bool {
        self.config
            .images
            .as_ref()
            .map_or(true, |imgs| imgs.contains(image))
    }

    fn stats(&self) -> NodeStats {
        let (cores_reserved, memory_reserved) = self.reserved();
        NodeStats {
            name: self.config.name.clone(),
            online: self.config.online,
            labels: self.config.labels.clone(),
            cores_total: self.config.cores,
            cores_reserved,
            memory_total: self.config.memory,
            memory_reserved,
            container_count: self
                .containers
                .values()
                .filter(|c| c.holds_resources())
                .count(),
            images: self.config.images.clone(),
        }
    }

    /// `None` if `reservation` fits the node's real free resources.
    fn lacks_resources(&self, reservation: &ResourceReservation) -> Option<String> {
        let (cores_reserved, memory_reserved) = self.reserved();
        let free_mem = self.config.memory.saturating_sub(memory_reserved);
        let free_cores = self.config.cores - cores_reserved;
        if reservation.memory.min > free_mem {
            return Some(format!(
                "not enough memory on {}: need {} bytes, {} free",
                self.config.name, reservation.memory.min, free_mem
            ));
        }
        if reservation.cores.min > free_cores {
            return Some(format!(
                "not enough cores on {}: need {}, {:.2} free",
                self.config.name, reservation.cores.min, free_cores
            ));
        }
        None
    }
}

#[derive(Debug, Default)]
struct SimState {
    nodes: BTreeMap<String, SimNode>,
    injected_failures: VecDeque<BackendError>,
    unavailable: bool,
}

impl SimState {
    fn find(&self, backend_id: &str) -> Option<(&str, &SimContainer)> {
        self.nodes.iter().find_map(|(name, n)| {
            n.containers
                .get(backend_id)
                .map(|c| (name.as_str(), c))
        })
    }

    fn find_mut(&mut self, backend_id: &str) -> Option<&mut SimContainer> {
        self.nodes
            .values_mut()
            .find_map(|n| n.containers.get_mut(backend_id))
    }
}

/// Emulated cluster implementing [`Backend`].
#[derive(Debug)]
pub struct SimulatedBackend {
    state: Mutex<SimState>,
    next_id: AtomicU64,
}

impl SimulatedBackend {
    pub fn new(nodes: &[NodeConfig]) -> Self {
        let nodes = nodes
            .iter()
            .map(|n| {
                (
                    n.name.clone(),
                    SimNode {
                        config: n.clone(),
                        containers: BTreeMap::new(),
                    },
                )
            })
            .collect();
        Self {
            state: Mutex::new(SimState {
                nodes,
                ..Default::default()
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Test hooks ────────────────────────────────────────────────────────────

    /// Mark the container of `service_id` as exited with `status`.
    ///
    /// Returns `false` if no container runs that service.
    pub fn kill_service(&self, service_id: ServiceId, status: BackendStatus) -> bool {
        let mut state = self.lock();
        for node in state.nodes.values_mut() {
            if let Some(c) = node
                .containers
                .values_mut()
                .find(|c| c.service_id == service_id)
            {
                info!(service = service_id, container = %c.name, %status, "[SIM] container killed");
                c.status = status;
                return true;
            }
        }
        false
    }

    /// Make the next `spawn_service` call fail with `error`.  Failures are
    /// consumed in FIFO order.
    pub fn inject_spawn_failure(&self, error: BackendError) {
        self.lock().injected_failures.push_back(error);
    }

    /// Make `platform_state` fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn set_node_online(&self, node: &str, online: bool) -> bool {
        match self.lock().nodes.get_mut(node) {
            Some(n) => {
                n.config.online = online;
                true
            }
            None => false,
        }
    }

    /// Containers currently holding resources, cluster-wide.
    pub fn running_count(&self) -> usize {
        self.lock()
            .nodes
            .values()
            .flat_map(|n| n.containers.values())
            .filter(|c| c.holds_resources())
            .count()
    }

    /// Node hosting `service_id`, if a container exists for it.
    pub fn host_of(&self, service_id: ServiceId) -> Option<String> {
        let state = self.lock();
        let host = state
            .nodes
            .iter()
            .find(|(_, n)| n.containers.values().any(|c| c.service_id == service_id))
            .map(|(name, _)| name.clone());
        host
    }

    pub fn soft_core_limit(&self, service_id: ServiceId) -> Option<f64> {
        self.lock()
            .nodes
            .values()
            .flat_map(|n| n.containers.values())
            .find(|c| c.service_id == service_id)
            .and_then(|c| c.soft_cores)
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn platform_state(&self) -> Result<ClusterStats, BackendError> {
        let state = self.lock();
        if state.unavailable {
            return Err(BackendError::Unavailable(
                "simulated cluster marked unavailable".into(),
            ));
        }
        let nodes = state.nodes.values().map(SimNode::stats).collect();
        Ok(ClusterStats::new(epoch_secs(), nodes))
    }

    async fn spawn_service(&self, instance: &ServiceInstance) -> Result<Placement, BackendError> {
        let mut state = self.lock();

        if let Some(err) = state.injected_failures.pop_front() {
            warn!(container = %instance.name, error = %err, "[SIM] injected spawn failure");
            return Err(err);
        }

        if !state.nodes.values().any(|n| n.has_image(&instance.image)) {
            return Err(BackendError::Fatal(format!(
                "image {} not found on any node",
                instance.image
            )));
        }

        // A node that went away after the snapshot was taken comes back as
        // a retry; only names the cluster never had are fatal.
        let node_name = match &instance.host_hint {
            Some(host) => match state.nodes.get(host) {
                Some(n) if n.config.online => host.clone(),
                Some(_) => return Err(BackendError::Retryable(format!("host {host} is offline"))),
                None => return Err(BackendError::Fatal(format!("unknown host {host}"))),
            },
            None => state
                .nodes
                .values()
                .find(|n| {
                    n.config.online
                        && n.has_image(&instance.image)
                        && n.lacks_resources(&instance.reservation).is_none()
                })
                .map(|n| n.config.name.clone())
                .ok_or_else(|| {
                    BackendError::Retryable("no node has enough free resources".into())
                })?,
        };

        let node_index = state
            .nodes
            .keys()
            .position(|k| *k == node_name)
            .unwrap_or(0);
        let node = state
            .nodes
            .get_mut(&node_name)
            .ok_or_else(|| BackendError::Fatal(format!("unknown host {node_name}")))?;

        if !node.has_image(&instance.image) {
            return Err(BackendError::Retryable(format!(
                "image {} not yet available on {}",
                instance.image, node_name
            )));
        }
        if let Some(reason) = node.lacks_resources(&instance.reservation) {
            return Err(BackendError::Retryable(reason));
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let backend_id = format!("sim-{seq:012x}");
        node.containers.insert(
            backend_id.clone(),
            SimContainer {
                service_id: instance.service_id,
                name: instance.name.clone(),
                image: instance.image.clone(),
                reservation: instance.reservation,
                status: BackendStatus::Started,
                soft_cores: None,
            },
        );

        debug!(
            container = %instance.name,
            node = %node_name,
            backend_id = %backend_id,
            "[SIM] container started"
        );

        Ok(Placement {
            backend_host: node_name,
            backend_id,
            ip_address: Some(format!("10.{}.{}.{}", node_index % 256, (seq >> 8) % 256, seq % 256)),
        })
    }

    async fn terminate_service(&self, service: &Service) -> Result<(), BackendError> {
        let Some(placement) = &service.placement else {
            return Ok(());
        };
        let mut state = self.lock();
        let removed = state
            .nodes
            .values_mut()
            .find_map(|n| n.containers.remove(&placement.backend_id));
        match removed {
            Some(c) => debug!(container = %c.name, image = %c.image, "[SIM] container removed"),
            None => debug!(backend_id = %placement.backend_id, "[SIM] container already gone"),
        }
        Ok(())
    }

    async fn service_status(&self, service: &Service) -> Result<BackendStatus, BackendError> {
        let Some(placement) = &service.placement else {
            return Ok(BackendStatus::Undefined);
        };
        let state = self.lock();
        let status = state
            .find(&placement.backend_id)
            .map_or(BackendStatus::Destroyed, |(_, c)| c.status);
        Ok(status)
    }

    async fn list_available_images(&self, node: &str) -> Option<Vec<String>> {
        let state = self.lock();
        let images = state
            .nodes
            .get(node)
            .and_then(|n| n.config.images.as_ref())
            .map(|imgs| imgs.iter().cloned().collect());
        images
    }

    async fn update_service_resource_limits(
        &self,
        service: &Service,
        cores: Option<f64>,
        memory: Option<u64>,
    ) -> Result<(), BackendError> {
        let backend_id = service
            .placement
            .as_ref()
            .map(|p| p.backend_id.clone())
            .ok_or_else(|| BackendError::Fatal(format!("service {} is not placed", service.id)))?;
        let mut state = self.lock();
        let container = state
            .find_mut(&backend_id)
            .ok_or_else(|| BackendError::Fatal(format!("no container {backend_id}")))?;
        if let Some(c) = cores {
            container.soft_cores = Some(c);
        }
        if let Some(m) = memory {
            container.reservation.memory.max = m;
        }
        debug!(container = %container.name, ?cores, ?memory, "[SIM] limits updated");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
