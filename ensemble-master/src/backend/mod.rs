/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Container backend contract.
//!
//! The scheduler talks to the container runtime only through [`Backend`].
//! One implementation per runtime technology is selected once at start-up by
//! [`build_backend`]; nothing re-dispatches on the backend kind per call.
//!
//! Errors are classified at this boundary so callers can switch on them:
//!
//! | variant                        | meaning                                   |
//! |--------------------------------|-------------------------------------------|
//! | [`BackendError::Retryable`]    | transient, e.g. node out of resources     |
//! | [`BackendError::Fatal`]        | image / configuration problem             |
//! | [`BackendError::Unavailable`]  | the runtime cannot be queried right now   |

pub mod instance;
pub mod simulated;

pub use instance::{InstanceError, ServiceInstance, TemplateError};
pub use simulated::SimulatedBackend;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::MasterConfig;
use crate::model::{BackendStatus, Placement, Service};
use crate::stats::ClusterStats;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("temporary backend failure: {0}")]
    Retryable(String),

    #[error("fatal backend failure: {0}")]
    Fatal(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Capability set every container runtime must provide.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Current per-node resource totals and reservations.
    ///
    /// Called at least once per scheduling pass.
    async fn platform_state(&self) -> Result<ClusterStats, BackendError>;

    /// Create and start one container, preferably on `instance.host_hint`.
    async fn spawn_service(&self, instance: &ServiceInstance) -> Result<Placement, BackendError>;

    /// Stop and remove the container backing `service`.  Removing a
    /// container that no longer exists succeeds.
    async fn terminate_service(&self, service: &Service) -> Result<(), BackendError>;

    /// Runtime state of the container backing `service`.
    async fn service_status(&self, service: &Service) -> Result<BackendStatus, BackendError>;

    /// Images present on `node`; `None` if the runtime does not track them.
    async fn list_available_images(&self, _node: &str) -> Option<Vec<String>> {
        None
    }

    /// Adjust limits of a running container.  `None` leaves a dimension
    /// unchanged.
    async fn update_service_resource_limits(
        &self,
        service: &Service,
        cores: Option<f64>,
        memory: Option<u64>,
    ) -> Result<(), BackendError>;
}

/// Configured backend technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In-process cluster described by the `nodes` configuration section.
    #[default]
    Simulated,
}

impl BackendKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "simulated" => Some(BackendKind::Simulated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Simulated => "simulated",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instantiate the configured backend.
pub fn build_backend(config: &MasterConfig) -> Arc<dyn Backend> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Simulated => Arc::new(SimulatedBackend::new(&config.nodes)),
    };
    info!(backend = backend.name(), "backend initialised");
    backend
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_names() {
        assert_eq!(BackendKind::from_name("Simulated"), Some(BackendKind::Simulated));
        assert_eq!(BackendKind::from_name("kubernetes"), None);
        assert_eq!(BackendKind::Simulated.to_string(), "simulated");
    }

    #[tokio::test]
    async fn factory_builds_simulated_backend_from_nodes() {
        let config = MasterConfig::default();
        let backend = build_backend(&config);
        assert_eq!(backend.name(), "simulated");
        let stats = backend.platform_state().await.unwrap();
        assert_eq!(stats.nodes.len(), config.nodes.len());
    }
}
