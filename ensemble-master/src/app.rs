/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Application descriptions and their digestion into services.
//!
//! Descriptions arrive already validated by the admission layer; this module
//! only turns a description into one [`Service`] per replica.
//!
//! ```yaml
//! name: spark-job
//! size: 600
//! services:
//!   - name: master
//!     image: "spark/master:2.4"
//!     total_count: 1
//!     essential_count: 1
//!     resources:
//!       cores:  { min: 1, max: 2 }
//!       memory: { min: 2147483648, max: 2147483648 }
//!   - name: worker
//!     image: "spark/worker:2.4"
//!     total_count: 4
//!     essential_count: 1
//!     resources:
//!       cores:  { min: 2, max: 4 }
//!       memory: { min: 4294967296, max: 4294967296 }
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{
    BackendStatus, ExecutionId, ResourceReservation, Service, ServiceId, ServiceStatus,
};

/// A user-submitted application: a flat list of service groups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationDescription {
    pub name: String,

    /// Declared size hint used by the `SIZE` / `DYNSIZE` queue policies.
    #[serde(default = "default_size")]
    pub size: f64,

    #[serde(default)]
    pub services: Vec<ServiceGroup>,
}

fn default_size() -> f64 {
    1.0
}

/// One group of identical replicas inside an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub name: String,
    pub image: String,

    /// Number of replicas to create.
    #[serde(default = "default_count")]
    pub total_count: u32,

    /// How many of `total_count` are essential; the rest are elastic.
    #[serde(default = "default_count")]
    pub essential_count: u32,

    #[serde(default)]
    pub monitor: bool,

    #[serde(default)]
    pub startup_order: u32,

    #[serde(default)]
    pub resources: ResourceReservation,

    #[serde(default)]
    pub labels: BTreeSet<String>,

    #[serde(default)]
    pub ports: Vec<u16>,

    #[serde(default)]
    pub environment: Vec<(String, String)>,
}

fn default_count() -> u32 {
    1
}

/// Everything a [`Service`] needs except the identifiers the store assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTemplate {
    pub name: String,
    pub group: String,
    pub essential: bool,
    pub monitor: bool,
    pub startup_order: u32,
    pub image: String,
    pub labels: BTreeSet<String>,
    pub ports: Vec<u16>,
    pub environment: Vec<(String, String)>,
    pub reservation: ResourceReservation,
}

impl ServiceTemplate {
    /// Materialise the template as a freshly created service.
    pub fn into_service(self, id: ServiceId, execution_id: ExecutionId) -> Service {
        Service {
            id,
            execution_id,
            name: self.name,
            group: self.group,
            essential: self.essential,
            monitor: self.monitor,
            startup_order: self.startup_order,
            image: self.image,
            labels: self.labels,
            ports: self.ports,
            environment: self.environment,
            reservation: self.reservation,
            status: ServiceStatus::Created,
            backend_status: BackendStatus::Undefined,
            placement: None,
            soft_core_limit: None,
            error_message: None,
        }
    }
}

impl ApplicationDescription {
    /// Parse a YAML application description.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Expand every group into one template per replica.
    ///
    /// The first `essential_count` replicas of a group are essential.  A
    /// monitor flag only applies to essential replicas.
    pub fn digest(&self) -> Vec<ServiceTemplate> {
        let mut out = Vec::new();
        for group in &self.services {
            let essential_count = group.essential_count.min(group.total_count);
            for index in 0..group.total_count {
                let essential = index < essential_count;
                out.push(ServiceTemplate {
                    name: format!("{}{}", group.name, index),
                    group: group.name.clone(),
                    essential,
                    monitor: group.monitor && essential,
                    startup_order: group.startup_order,
                    image: group.image.clone(),
                    labels: group.labels.clone(),
                    ports: group.ports.clone(),
                    environment: group.environment.clone(),
                    reservation: group.resources,
                });
            }
        }
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SPARK: &str = r#"
name: spark-job
size: 600
services:
  - name: master
    image: "spark/master:2.4"
    monitor: true
    resources:
      cores:  { min: 1, max: 2 }
      memory: { min: 1024, max: 2048 }
  - name: worker
    image: "spark/worker:2.4"
    total_count: 3
    essential_count: 1
    startup_order: 1
    labels: [ssd]
    resources:
      cores:  { min: 2, max: 4 }
      memory: { min: 4096, max: 4096 }
"#;

    #[test]
    fn parses_yaml_description() {
        let app = ApplicationDescription::from_yaml(SPARK).unwrap();
        assert_eq!(app.name, "spark-job");
        assert_eq!(app.size, 600.0);
        assert_eq!(app.services.len(), 2);
        assert_eq!(app.services[1].total_count, 3);
        assert!(app.services[1].labels.contains("ssd"));
    }

    #[test]
    fn digest_creates_one_service_per_replica() {
        let app = ApplicationDescription::from_yaml(SPARK).unwrap();
        let templates = app.digest();
        let names: Vec<_> = templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["master0", "worker0", "worker1", "worker2"]);
    }

    #[test]
    fn digest_marks_first_replicas_essential() {
        let app = ApplicationDescription::from_yaml(SPARK).unwrap();
        let templates = app.digest();
        let essential: Vec<bool> = templates.iter().map(|t| t.essential).collect();
        assert_eq!(essential, vec![true, true, false, false]);
        assert!(templates[0].monitor);
        assert!(!templates[1].monitor);
    }

    #[test]
    fn essential_count_is_clamped_to_total() {
        let app = ApplicationDescription {
            name: "x".into(),
            size: 1.0,
            services: vec![ServiceGroup {
                name: "a".into(),
                image: "a:1".into(),
                total_count: 2,
                essential_count: 5,
                monitor: false,
                startup_order: 0,
                resources: ResourceReservation::default(),
                labels: BTreeSet::new(),
                ports: vec![],
                environment: vec![],
            }],
        };
        assert_eq!(app.digest().len(), 2);
        assert!(app.digest().iter().all(|t| t.essential));
    }

    #[test]
    fn template_becomes_created_service() {
        let app = ApplicationDescription::from_yaml(SPARK).unwrap();
        let svc = app.digest().remove(0).into_service(7, 3);
        assert_eq!(svc.id, 7);
        assert_eq!(svc.execution_id, 3);
        assert_eq!(svc.status, ServiceStatus::Created);
        assert_eq!(svc.backend_status, BackendStatus::Undefined);
        assert!(svc.placement.is_none());
    }
}
