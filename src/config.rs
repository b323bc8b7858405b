//! Process configuration.
//!
//! Layers, later wins: the embedded `config/default.toml`, an optional file
//! given with `--config`, then `FORGE_`-prefixed environment variables with
//! `__` separating sections from keys.

use crate::cluster::health::{
    DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_PROBE_TIMEOUT, HealthConfig,
};
use crate::cluster::probe::ProbeKind;
use crate::cluster::ring::MAX_VIRTUAL_NODES_PER_NODE;
use crate::cluster::{NodeId, NodeSpec, PlacementStrategy};
use crate::ssh::SshSettings;
use crate::storage::replication::ReplicationConfig;

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULTS: &str = include_str!("../config/default.toml");
const ENV_PREFIX: &str = "FORGE_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ssh: SshConfig,
    pub storage: StorageConfig,
    pub cluster: ClusterConfig,
    pub access: AccessConfig,
    pub admin: AdminConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub host_key_path: PathBuf,
    pub inactivity_timeout_secs: u64,
    pub auth_rejection_time_ms: u64,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    pub git_binary: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub distributed: bool,
    pub node_id: String,
    pub replication_count: usize,
    pub consistent_hashing: bool,
    /// Go-style duration string, e.g. `30s`, `1m30s`, `500ms`.
    #[serde(default)]
    pub health_check_interval: Option<String>,
    pub probe: ProbeKind,
    pub probe_timeout_ms: u64,
    pub failure_threshold: u32,
    pub base_virtual_nodes: u32,
    pub replication_attempts: usize,
    pub replication_backoff_ms: u64,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub address: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Defaults to `<storage.base_path>/nodes/<id>`.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    pub acl_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Loads defaults, the optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::string(DEFAULTS));
        if let Some(path) = path {
            figment = figment.merge(Toml::file_exact(path));
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `overrides`; ignores the environment.
    pub fn from_toml(overrides: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Toml::string(DEFAULTS))
            .merge(Toml::string(overrides))
            .extract()
            .context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.replication_count == 0 {
            bail!("cluster.replication_count must be at least 1");
        }

        if self.cluster.base_virtual_nodes == 0 {
            bail!("cluster.base_virtual_nodes must be at least 1");
        }

        let mut seen = HashSet::new();
        for node in &self.cluster.nodes {
            if node.id.is_empty() {
                bail!("cluster.nodes: node id must not be empty");
            }
            if node.weight == 0 {
                bail!("cluster.nodes: node {} has weight 0, weights start at 1", node.id);
            }
            let points = u64::from(self.cluster.base_virtual_nodes) * u64::from(node.weight);
            if points > u64::from(MAX_VIRTUAL_NODES_PER_NODE) {
                bail!(
                    "cluster.nodes: node {} would get {} virtual nodes, the limit is {}",
                    node.id,
                    points,
                    MAX_VIRTUAL_NODES_PER_NODE
                );
            }
            if !seen.insert(node.id.as_str()) {
                bail!("cluster.nodes: duplicate node id {}", node.id);
            }
        }

        if self.cluster.distributed {
            if self.cluster.nodes.is_empty() {
                bail!("cluster.distributed is set but cluster.nodes is empty");
            }
            if !seen.contains(self.cluster.node_id.as_str()) {
                tracing::warn!(
                    node_id = %self.cluster.node_id,
                    "cluster.node_id is not one of cluster.nodes"
                );
            }
        }
        Ok(())
    }

    pub fn ssh_settings(&self) -> Result<SshSettings> {
        let ip: IpAddr = self
            .ssh
            .host
            .parse()
            .with_context(|| format!("invalid ssh.host: {}", self.ssh.host))?;
        let inactivity_timeout = match self.ssh.inactivity_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(SshSettings {
            listen_addr: SocketAddr::new(ip, self.ssh.port),
            inactivity_timeout,
            auth_rejection_time: Duration::from_millis(self.ssh.auth_rejection_time_ms),
            shutdown_grace: Duration::from_secs(self.ssh.shutdown_grace_secs),
        })
    }

    pub fn admin_addr(&self) -> Result<Option<SocketAddr>> {
        let addr = self.admin.listen_addr.trim();
        if addr.is_empty() {
            return Ok(None);
        }
        addr.parse()
            .map(Some)
            .with_context(|| format!("invalid admin.listen_addr: {}", addr))
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(&self.cluster.node_id)
    }

    pub fn node_specs(&self) -> Vec<NodeSpec> {
        self.cluster
            .nodes
            .iter()
            .map(|node| NodeSpec {
                id: NodeId::new(&node.id),
                address: node.address.clone(),
                weight: node.weight,
                root: node.root.clone().unwrap_or_else(|| {
                    self.storage.base_path.join("nodes").join(&node.id)
                }),
            })
            .collect()
    }

    pub fn placement_strategy(&self) -> PlacementStrategy {
        if self.cluster.consistent_hashing {
            PlacementStrategy::ConsistentHash
        } else {
            PlacementStrategy::Static
        }
    }

    /// Health check interval. Missing, unparsable or zero values fall back
    /// to 30 seconds.
    pub fn health_check_interval(&self) -> Duration {
        let Some(raw) = self.cluster.health_check_interval.as_deref() else {
            return DEFAULT_HEALTH_CHECK_INTERVAL;
        };
        match parse_duration(raw) {
            Ok(interval) if !interval.is_zero() => interval,
            Ok(_) => {
                tracing::warn!(value = raw, "zero health_check_interval, using 30s");
                DEFAULT_HEALTH_CHECK_INTERVAL
            }
            Err(e) => {
                tracing::warn!(value = raw, error = %e, "invalid health_check_interval, using 30s");
                DEFAULT_HEALTH_CHECK_INTERVAL
            }
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        let probe_timeout = match self.cluster.probe_timeout_ms {
            0 => DEFAULT_PROBE_TIMEOUT,
            ms => Duration::from_millis(ms),
        };
        HealthConfig {
            interval: self.health_check_interval(),
            probe_timeout,
            failure_threshold: self.cluster.failure_threshold.max(1),
        }
    }

    pub fn replication_config(&self) -> ReplicationConfig {
        let initial_backoff = Duration::from_millis(self.cluster.replication_backoff_ms);
        ReplicationConfig {
            attempts: self.cluster.replication_attempts.max(1),
            initial_backoff,
            max_backoff: initial_backoff * 8,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("missing unit after {0}")]
    MissingUnit(String),
    #[error("unknown unit {0:?}")]
    UnknownUnit(String),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
}

/// Parses Go-style durations: a sequence of decimal numbers each followed by
/// a unit (`ns`, `us`, `ms`, `s`, `m`, `h`), such as `1h30m` or `1.5s`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationError::Empty);
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() {
            return Err(DurationError::InvalidNumber(rest.to_string()));
        }
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let nanos_per_unit: u64 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(DurationError::MissingUnit(number.to_string())),
            other => return Err(DurationError::UnknownUnit(other.to_string())),
        };

        let invalid = || DurationError::InvalidNumber(number.to_string());
        let nanos = if number.contains('.') {
            let value: f64 = number.parse().map_err(|_| invalid())?;
            (value * nanos_per_unit as f64).round() as u64
        } else {
            let value: u64 = number.parse().map_err(|_| invalid())?;
            value.checked_mul(nanos_per_unit).ok_or_else(invalid)?
        };

        total += Duration::from_nanos(nanos);
        rest = next;
    }
    Ok(total)
}
