/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Backend-neutral description of one container to create.
//!
//! A [`ServiceInstance`] is built from an [`Execution`], one of its
//! [`Service`]s and the scheduler's placement hint.  Building it resolves
//! `{placeholder}` templates in environment values:
//!
//! | placeholder         | value                                         |
//! |---------------------|-----------------------------------------------|
//! | `execution_id`      | numeric execution id                          |
//! | `execution_name`    | execution name                                |
//! | `user_name`         | owner of the execution                        |
//! | `deployment_name`   | configured deployment name                    |
//! | `service_name`      | name of the service being started             |
//! | `dns_name`          | DNS name of the service being started         |
//! | `dns_name#self`     | same as `dns_name`                            |
//! | `dns_name#<svc>`    | DNS name of sibling service `<svc>`           |
//!
//! `{{` and `}}` produce literal braces.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::model::{Execution, ExecutionId, ResourceReservation, Service, ServiceId};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown variable '{variable}' in environment expression '{expression}', known variables are: {known:?}")]
    UnknownVariable {
        variable: String,
        expression: String,
        known: Vec<String>,
    },

    #[error("unbalanced braces in environment expression '{expression}'")]
    Unbalanced { expression: String },
}

/// Why a [`ServiceInstance`] could not be built.  Always fatal for the start
/// attempt: retrying cannot fix the description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    #[error("service {service}: {source}")]
    Template {
        service: String,
        #[source]
        source: TemplateError,
    },

    #[error("image '{0}' has no version tag")]
    UntaggedImage(String),
}

// ── Naming ────────────────────────────────────────────────────────────────────

/// `<service>-<execution>-<deployment>`: unique across deployments sharing
/// one backend, also used as the DNS name.
pub fn unique_name(service_name: &str, execution_id: ExecutionId, deployment: &str) -> String {
    format!("{service_name}-{execution_id}-{deployment}")
}

/// `true` if `image` carries an explicit `:tag` or `@digest`.
pub fn image_has_tag(image: &str) -> bool {
    if image.contains('@') {
        return true;
    }
    // A colon before the last '/' belongs to a registry port.
    let last = image.rsplit('/').next().unwrap_or(image);
    matches!(last.split_once(':'), Some((_, tag)) if !tag.is_empty())
}

// ── Templates ─────────────────────────────────────────────────────────────────

/// Expand `{name}` placeholders in `expression` from `vars`.
pub fn expand_template(
    expression: &str,
    vars: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(expression.len());
    let mut chars = expression.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed || name.contains('{') {
                    return Err(TemplateError::Unbalanced {
                        expression: expression.to_string(),
                    });
                }
                match vars.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        let mut known: Vec<String> = vars.keys().cloned().collect();
                        known.sort();
                        return Err(TemplateError::UnknownVariable {
                            variable: name,
                            expression: expression.to_string(),
                            known,
                        });
                    }
                }
            }
            '}' => {
                return Err(TemplateError::Unbalanced {
                    expression: expression.to_string(),
                })
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Substitution dictionary for one service of `execution`.
pub fn substitutions(
    execution: &Execution,
    service: &Service,
    deployment: &str,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("execution_id".to_string(), execution.id.to_string());
    vars.insert("execution_name".to_string(), execution.name.clone());
    vars.insert("user_name".to_string(), execution.owner.clone());
    vars.insert("deployment_name".to_string(), deployment.to_string());
    vars.insert("service_name".to_string(), service.name.clone());

    for sibling in &execution.services {
        vars.insert(
            format!("dns_name#{}", sibling.name),
            unique_name(&sibling.name, execution.id, deployment),
        );
    }
    let own = unique_name(&service.name, execution.id, deployment);
    vars.insert("dns_name#self".to_string(), own.clone());
    vars.insert("dns_name".to_string(), own);
    vars
}

// ── ServiceInstance ───────────────────────────────────────────────────────────

/// Everything a backend needs to create one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstance {
    pub service_id: ServiceId,
    pub execution_id: ExecutionId,
    /// Container name, see [`unique_name`].
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub reservation: ResourceReservation,
    pub labels: BTreeMap<String, String>,
    /// Expanded user environment followed by the built-in variables.
    pub environment: Vec<(String, String)>,
    pub ports: Vec<u16>,
    /// Node the scheduler simulated this service on.
    pub host_hint: Option<String>,
}

impl ServiceInstance {
    pub fn new(
        execution: &Execution,
        service: &Service,
        deployment: &str,
        host_hint: Option<String>,
    ) -> Result<Self, InstanceError> {
        if !image_has_tag(&service.image) {
            return Err(InstanceError::UntaggedImage(service.image.clone()));
        }

        let vars = substitutions(execution, service, deployment);
        let mut environment = Vec::with_capacity(service.environment.len() + 4);
        for (key, value) in &service.environment {
            let expanded =
                expand_template(value, &vars).map_err(|source| InstanceError::Template {
                    service: service.name.clone(),
                    source,
                })?;
            environment.push((key.clone(), expanded));
        }
        environment.push(("EXECUTION_ID".into(), execution.id.to_string()));
        environment.push(("DEPLOY_NAME".into(), deployment.to_string()));
        environment.push(("UID".into(), execution.owner.clone()));
        environment.push(("SERVICE_NAME".into(), service.name.clone()));

        let mut labels = BTreeMap::new();
        labels.insert("ensemble.execution.id".into(), execution.id.to_string());
        labels.insert("ensemble.execution.name".into(), execution.name.clone());
        labels.insert("ensemble.service.id".into(), service.id.to_string());
        labels.insert("ensemble.service.name".into(), service.name.clone());
        labels.insert("ensemble.owner".into(), execution.owner.clone());
        labels.insert("ensemble.deployment".into(), deployment.to_string());
        labels.insert("ensemble.monitor".into(), service.monitor.to_string());

        let name = unique_name(&service.name, execution.id, deployment);
        Ok(Self {
            service_id: service.id,
            execution_id: execution.id,
            hostname: name.clone(),
            name,
            image: service.image.clone(),
            reservation: service.reservation,
            labels,
            environment,
            ports: service.ports.clone(),
            host_hint,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{execution, service};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ── Templates ─────────────────────────────────────────────────────────────

    #[test]
    fn expands_known_placeholders() {
        let v = vars(&[("execution_id", "7"), ("user_name", "alice")]);
        assert_eq!(
            expand_template("run-{execution_id}-{user_name}", &v).unwrap(),
            "run-7-alice"
        );
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(expand_template("no templates", &vars(&[])).unwrap(), "no templates");
    }

    #[test]
    fn doubled_braces_are_literal() {
        assert_eq!(expand_template("{{x}}", &vars(&[])).unwrap(), "{x}");
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = expand_template("{nope}", &vars(&[("a", "1")])).unwrap_err();
        match err {
            TemplateError::UnknownVariable { variable, known, .. } => {
                assert_eq!(variable, "nope");
                assert_eq!(known, vec!["a".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unbalanced_braces_are_rejected() {
        assert!(matches!(
            expand_template("{open", &vars(&[])),
            Err(TemplateError::Unbalanced { .. })
        ));
        assert!(matches!(
            expand_template("close}", &vars(&[])),
            Err(TemplateError::Unbalanced { .. })
        ));
    }

    // ── Images ────────────────────────────────────────────────────────────────

    #[test]
    fn image_tag_detection() {
        assert!(image_has_tag("repo/app:1.0"));
        assert!(image_has_tag("registry:5000/app:latest"));
        assert!(image_has_tag("app@sha256:abc"));
        assert!(!image_has_tag("repo/app"));
        assert!(!image_has_tag("registry:5000/app"));
        assert!(!image_has_tag("app:"));
    }

    // ── ServiceInstance ───────────────────────────────────────────────────────

    #[test]
    fn instance_carries_names_labels_and_environment() {
        let mut s = service(3, 9, true, 1.0, 100);
        s.name = "master0".into();
        s.environment = vec![("PEER".into(), "{dns_name#worker0}:7077".into())];
        let mut w = service(4, 9, false, 1.0, 100);
        w.name = "worker0".into();
        let e = execution(9, vec![s.clone(), w]);

        let inst = ServiceInstance::new(&e, &s, "prod", Some("node01".into())).unwrap();
        assert_eq!(inst.name, "master0-9-prod");
        assert_eq!(inst.hostname, inst.name);
        assert_eq!(inst.host_hint.as_deref(), Some("node01"));
        assert_eq!(inst.environment[0], ("PEER".into(), "worker0-9-prod:7077".into()));
        assert!(inst
            .environment
            .contains(&("EXECUTION_ID".to_string(), "9".to_string())));
        assert_eq!(inst.labels["ensemble.owner"], "alice");
        assert_eq!(inst.labels["ensemble.monitor"], "false");
    }

    #[test]
    fn bad_template_fails_instance() {
        let mut s = service(1, 1, true, 1.0, 100);
        s.environment = vec![("X".into(), "{missing}".into())];
        let e = execution(1, vec![s.clone()]);
        let err = ServiceInstance::new(&e, &s, "d", None).unwrap_err();
        assert!(matches!(err, InstanceError::Template { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn untagged_image_fails_instance() {
        let mut s = service(1, 1, true, 1.0, 100);
        s.image = "repo/app".into();
        let e = execution(1, vec![s.clone()]);
        assert_eq!(
            ServiceInstance::new(&e, &s, "d", None),
            Err(InstanceError::UntaggedImage("repo/app".into()))
        );
    }
}
