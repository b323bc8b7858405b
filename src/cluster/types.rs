use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static description of a storage backend, as read from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: NodeId,
    /// `host:port` probed by the health monitor.
    pub address: String,
    pub weight: u32,
    /// Directory under which this node's repositories are reachable.
    pub root: PathBuf,
}

/// A storage backend together with its current health as seen by the monitor.
///
/// `healthy`, `last_checked_at` and `consecutive_failures` are written only by
/// the `HealthMonitor`; everything else is fixed until a configuration reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageNode {
    pub id: NodeId,
    pub address: String,
    pub weight: u32,
    pub root: PathBuf,
    pub healthy: bool,
    /// Milliseconds since the Unix epoch of the last completed probe.
    pub last_checked_at: Option<u64>,
    pub consecutive_failures: u32,
}

impl StorageNode {
    pub fn from_spec(spec: NodeSpec) -> Self {
        Self {
            id: spec.id,
            address: spec.address,
            weight: spec.weight.max(1),
            root: spec.root,
            healthy: true,
            last_checked_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Outcome of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
}

/// A health transition produced by recording a probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
    Unchanged,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
