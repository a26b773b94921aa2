//! Master configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! deployment_name: prod
//! scheduler:
//!   policy: FIFO            # FIFO | SIZE | DYNSIZE
//!   placement: average      # random | waterfill | average
//!   self_trigger_secs: 60
//!   retry_base_ms: 500
//!   retry_max_ms: 60000
//! core_limit:
//!   enabled: true
//!   interval_secs: 30
//! synchronizer:
//!   interval_secs: 10
//! backend:
//!   kind: simulated
//! quotas:
//!   default: { concurrent_executions: 5, cores: 16, memory_mb: 65536 }
//!   users:
//!     alice: { concurrent_executions: 2, cores: 8, memory_mb: 16384, runtime_limit_secs: 3600 }
//! nodes:
//!   node01: { cores: 8, memory_mb: 16384, labels: [gpu], images: ["repo/app:1.0"] }
//! ```
//!
//! Every section is optional; missing values fall back to the defaults
//! documented on the public types.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::backend::BackendKind;
use crate::cluster::PlacementPolicy;
use crate::scheduler::QueuePolicy;
use crate::state::{Quota, QuotaTable};

const MIB: u64 = 1024 * 1024;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MasterConfigFile {
    deployment_name: Option<String>,
    scheduler: SchedulerEntry,
    core_limit: CoreLimitEntry,
    synchronizer: SynchronizerEntry,
    backend: BackendEntry,
    quotas: QuotasEntry,
    nodes: BTreeMap<String, NodeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SchedulerEntry {
    policy: String,
    placement: String,
    self_trigger_secs: u64,
    retry_base_ms: u64,
    retry_max_ms: u64,
}

impl Default for SchedulerEntry {
    fn default() -> Self {
        Self {
            policy: "FIFO".into(),
            placement: "average".into(),
            self_trigger_secs: 60,
            retry_base_ms: 500,
            retry_max_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CoreLimitEntry {
    enabled: bool,
    interval_secs: u64,
}

impl Default for CoreLimitEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SynchronizerEntry {
    interval_secs: u64,
}

impl Default for SynchronizerEntry {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BackendEntry {
    kind: String,
}

impl Default for BackendEntry {
    fn default() -> Self {
        Self {
            kind: "simulated".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuotasEntry {
    default: Option<QuotaEntry>,
    users: HashMap<String, QuotaEntry>,
}

/// Quota fields as they appear in YAML; absent fields take the built-in
/// default quota's value.
#[derive(Debug, Default, Deserialize)]
struct QuotaEntry {
    concurrent_executions: Option<u32>,
    cores: Option<f64>,
    memory_mb: Option<u64>,
    runtime_limit_secs: Option<u64>,
}

impl QuotaEntry {
    fn resolve(self, base: &Quota) -> Quota {
        Quota {
            concurrent_executions: self
                .concurrent_executions
                .unwrap_or(base.concurrent_executions),
            cores: self.cores.unwrap_or(base.cores),
            memory: self.memory_mb.map_or(base.memory, |mb| mb * MIB),
            runtime_limit_secs: self.runtime_limit_secs.or(base.runtime_limit_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    #[serde(default = "default_node_cores")]
    cores: f64,
    #[serde(default = "default_node_memory_mb")]
    memory_mb: u64,
    #[serde(default)]
    labels: BTreeSet<String>,
    /// Absent means the node does not track images.
    images: Option<BTreeSet<String>>,
    #[serde(default = "default_online")]
    online: bool,
}

fn default_node_cores() -> f64 {
    4.0
}

fn default_node_memory_mb() -> u64 {
    4096
}

fn default_online() -> bool {
    true
}

// ── Public data structures ────────────────────────────────────────────────────

/// Scheduling loop tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub policy: QueuePolicy,
    pub placement: PlacementPolicy,
    /// Safety-net wake-up interval.
    pub self_trigger: Duration,
    /// First retry delay after a transient start failure.
    pub retry_base: Duration,
    /// Upper bound of the exponential retry delay.
    pub retry_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: QueuePolicy::Fifo,
            placement: PlacementPolicy::Average,
            self_trigger: Duration::from_secs(60),
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoreLimitConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for CoreLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
        }
    }
}

/// One node of the cluster driven by the simulated backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub cores: f64,
    /// Bytes.
    pub memory: u64,
    pub labels: BTreeSet<String>,
    pub images: Option<BTreeSet<String>>,
    pub online: bool,
}

impl NodeConfig {
    /// Fallback node used when the configuration lists none.
    pub fn default_config(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cores: default_node_cores(),
            memory: default_node_memory_mb() * MIB,
            labels: BTreeSet::new(),
            images: None,
            online: true,
        }
    }
}

/// Fully resolved master configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterConfig {
    /// Prefix that keeps container names of parallel deployments apart.
    pub deployment_name: String,
    pub scheduler: SchedulerConfig,
    pub core_limit: CoreLimitConfig,
    /// Backend status poll interval.
    pub synchronizer_interval: Duration,
    pub backend: BackendKind,
    pub quotas: QuotaTable,
    /// Sorted by name.
    pub nodes: Vec<NodeConfig>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            deployment_name: "ensemble".into(),
            scheduler: SchedulerConfig::default(),
            core_limit: CoreLimitConfig::default(),
            synchronizer_interval: Duration::from_secs(10),
            backend: BackendKind::Simulated,
            quotas: QuotaTable::default(),
            nodes: vec![NodeConfig::default_config("default_node")],
        }
    }
}

impl MasterConfig {
    /// Parse the configuration file at `path`.
    ///
    /// * An empty or missing `nodes` section inserts a single
    ///   `"default_node"`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or a policy / backend name is unknown.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading master configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document deserializes as `null`.
        let file: MasterConfigFile = if content.trim().is_empty() {
            MasterConfigFile::default()
        } else {
            serde_yaml::from_str(content).context("Failed to parse YAML")?
        };

        let policy = QueuePolicy::from_name(&file.scheduler.policy).ok_or_else(|| {
            anyhow!(
                "unknown scheduler policy '{}' (valid: FIFO, SIZE, DYNSIZE)",
                file.scheduler.policy
            )
        })?;
        let backend = BackendKind::from_name(&file.backend.kind)
            .ok_or_else(|| anyhow!("unknown backend kind '{}'", file.backend.kind))?;

        let scheduler = SchedulerConfig {
            policy,
            placement: PlacementPolicy::from_name(&file.scheduler.placement),
            self_trigger: Duration::from_secs(file.scheduler.self_trigger_secs.max(1)),
            retry_base: Duration::from_millis(file.scheduler.retry_base_ms),
            retry_max: Duration::from_millis(
                file.scheduler.retry_max_ms.max(file.scheduler.retry_base_ms),
            ),
        };

        let builtin = Quota::default();
        let default_quota = file
            .quotas
            .default
            .map_or_else(|| builtin.clone(), |q| q.resolve(&builtin));
        let users = file
            .quotas
            .users
            .into_iter()
            .map(|(user, q)| {
                let quota = q.resolve(&default_quota);
                (user, quota)
            })
            .collect();

        let mut nodes: Vec<NodeConfig> = file
            .nodes
            .into_iter()
            .map(|(name, entry)| NodeConfig {
                name,
                cores: entry.cores,
                memory: entry.memory_mb * MIB,
                labels: entry.labels,
                images: entry.images,
                online: entry.online,
            })
            .collect();

        if nodes.is_empty() {
            warn!("No nodes found in configuration, using default node");
            nodes.push(NodeConfig::default_config("default_node"));
        }

        for node in &nodes {
            debug!(
                "  Node: {} | Cores: {} | Memory: {}MB | Labels: {:?} | Online: {}",
                node.name,
                node.cores,
                node.memory / MIB,
                node.labels,
                node.online,
            );
        }

        let config = Self {
            deployment_name: file
                .deployment_name
                .unwrap_or_else(|| MasterConfig::default().deployment_name),
            scheduler,
            core_limit: CoreLimitConfig {
                enabled: file.core_limit.enabled,
                interval: Duration::from_secs(file.core_limit.interval_secs.max(1)),
            },
            synchronizer_interval: Duration::from_secs(file.synchronizer.interval_secs.max(1)),
            backend,
            quotas: QuotaTable {
                default: default_quota,
                users,
            },
            nodes,
        };

        info!(
            deployment = %config.deployment_name,
            policy = %config.scheduler.policy,
            placement = %config.scheduler.placement,
            nodes = config.nodes.len(),
            "configuration loaded"
        );
        Ok(config)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    // ── Full file ─────────────────────────────────────────────────────────────

    #[test]
    fn load_full_yaml() {
        let yaml = r#"
deployment_name: prod
scheduler:
  policy: DYNSIZE
  placement: waterfill
  self_trigger_secs: 15
  retry_base_ms: 100
  retry_max_ms: 2000
core_limit:
  enabled: false
  interval_secs: 5
synchronizer:
  interval_secs: 3
backend:
  kind: simulated
quotas:
  default: { concurrent_executions: 3, cores: 4, memory_mb: 1024 }
  users:
    alice: { concurrent_executions: 1, runtime_limit_secs: 3600 }
nodes:
  node02: { cores: 2, memory_mb: 512, online: false }
  node01: { cores: 8, memory_mb: 16384, labels: [gpu], images: ["repo/app:1.0"] }
"#;
        let f = yaml_tempfile(yaml);
        let cfg = MasterConfig::load_from_file(f.path()).unwrap();

        assert_eq!(cfg.deployment_name, "prod");
        assert_eq!(cfg.scheduler.policy, QueuePolicy::DynSize);
        assert_eq!(cfg.scheduler.placement, PlacementPolicy::Waterfill);
        assert_eq!(cfg.scheduler.self_trigger, Duration::from_secs(15));
        assert_eq!(cfg.scheduler.retry_base, Duration::from_millis(100));
        assert_eq!(cfg.scheduler.retry_max, Duration::from_millis(2000));
        assert!(!cfg.core_limit.enabled);
        assert_eq!(cfg.synchronizer_interval, Duration::from_secs(3));

        assert_eq!(cfg.quotas.default.concurrent_executions, 3);
        assert_eq!(cfg.quotas.default.memory, 1024 * MIB);
        let alice = cfg.quotas.for_user("alice");
        assert_eq!(alice.concurrent_executions, 1);
        assert_eq!(alice.cores, 4.0, "unset user fields inherit the default quota");
        assert_eq!(alice.runtime_limit_secs, Some(3600));

        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.nodes[0].name, "node01", "nodes are sorted by name");
        assert_eq!(cfg.nodes[0].memory, 16384 * MIB);
        assert!(cfg.nodes[0].labels.contains("gpu"));
        assert!(cfg.nodes[0].images.as_ref().unwrap().contains("repo/app:1.0"));
        assert!(!cfg.nodes[1].online);
        assert!(cfg.nodes[1].images.is_none());
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn empty_file_uses_defaults() {
        let f = yaml_tempfile("");
        let cfg = MasterConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg, MasterConfig::default());
    }

    #[test]
    fn empty_nodes_section_inserts_default_node() {
        let cfg = MasterConfig::from_yaml_str("nodes: {}\n").unwrap();
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].name, "default_node");
    }

    #[test]
    fn node_fields_use_defaults_when_absent() {
        let cfg = MasterConfig::from_yaml_str("nodes:\n  n1: {}\n").unwrap();
        let n = &cfg.nodes[0];
        assert_eq!(n.cores, 4.0);
        assert_eq!(n.memory, 4096 * MIB);
        assert!(n.online);
        assert!(n.labels.is_empty());
    }

    #[test]
    fn unknown_placement_falls_back_to_first_candidate() {
        let cfg = MasterConfig::from_yaml_str("scheduler:\n  placement: magic\n").unwrap();
        assert_eq!(cfg.scheduler.placement, PlacementPolicy::FirstCandidate);
    }

    // ── Errors ────────────────────────────────────────────────────────────────

    #[test]
    fn unknown_queue_policy_is_an_error() {
        let err = MasterConfig::from_yaml_str("scheduler:\n  policy: LIFO\n").unwrap_err();
        assert!(format!("{err:#}").contains("LIFO"));
    }

    #[test]
    fn unknown_backend_is_an_error() {
        assert!(MasterConfig::from_yaml_str("backend:\n  kind: swarm\n").is_err());
    }

    #[test]
    fn missing_file_returns_error() {
        let result = MasterConfig::load_from_file(Path::new("/nonexistent/path/master.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        assert!(MasterConfig::load_from_file(f.path()).is_err());
    }
}
