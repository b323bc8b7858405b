//! Admin API Protocol
//!
//! Endpoints and Data Transfer Objects of the status API. Peers probe
//! `/health`; operators inspect node state and repository placement.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Liveness endpoint, also the target of `http` health probes.
pub const ENDPOINT_HEALTH: &str = "/health";
/// Registry view: every configured storage node with its health.
pub const ENDPOINT_NODES: &str = "/nodes";
/// Placement of one repository (`/placement/:owner/:name`).
pub const ENDPOINT_PLACEMENT: &str = "/placement/:owner/:name";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    /// `local` or `distributed`.
    pub mode: String,
}

/// One storage node as seen by this process.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeStatus {
    pub id: String,
    pub address: String,
    pub weight: u32,
    pub root: String,
    pub healthy: bool,
    /// Unix milliseconds of the last probe, if any ran yet.
    pub last_checked_at: Option<u64>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlacementResponse {
    pub repository: String,
    /// Node ids in placement order; the first is the primary.
    pub nodes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
