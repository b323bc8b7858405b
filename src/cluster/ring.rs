//! Consistent hash ring with weighted virtual nodes.
//!
//! A `HashRing` is immutable once built. `RingHandle` publishes the current
//! ring behind an `ArcSwap`, so a rebuild swaps in a complete new table while
//! concurrent lookups keep reading the snapshot they loaded.

use super::types::{NodeId, NodeSpec};

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const DEFAULT_BASE_VIRTUAL_NODES: u32 = 160;
/// Upper bound on `base_virtual_nodes * weight` for a single node.
pub const MAX_VIRTUAL_NODES_PER_NODE: u32 = 65_536;

/// 64-bit ring position: the first eight bytes of SHA-256, big-endian.
pub fn ring_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Debug, Clone, Default)]
pub struct HashRing {
    /// Sorted by position, then node id.
    points: Vec<(u64, NodeId)>,
    node_count: usize,
}

impl HashRing {
    pub fn build(nodes: &[NodeSpec], base_virtual_nodes: u32) -> Self {
        let base = base_virtual_nodes.max(1);
        let mut points = Vec::new();
        let mut node_count = 0;

        for node in nodes {
            let virtual_nodes = base
                .saturating_mul(node.weight.max(1))
                .min(MAX_VIRTUAL_NODES_PER_NODE);
            points.reserve(virtual_nodes as usize);
            for index in 0..virtual_nodes {
                let position = ring_hash(&format!("{}#{}", node.id, index));
                points.push((position, node.id.clone()));
            }
            node_count += 1;
        }

        points.sort_unstable_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        points.dedup();

        Self { points, node_count }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn virtual_node_count(&self) -> usize {
        self.points.len()
    }

    /// Walks clockwise from `hash(key)` and returns up to `n` distinct nodes
    /// accepted by `is_healthy`, in ring order.
    ///
    /// Returns fewer than `n` entries when not enough healthy nodes exist.
    pub fn lookup<F>(&self, key: &str, n: usize, is_healthy: F) -> Vec<NodeId>
    where
        F: Fn(&NodeId) -> bool,
    {
        let mut placement: Vec<NodeId> = Vec::with_capacity(n);
        if self.points.is_empty() || n == 0 {
            return placement;
        }

        let hash = ring_hash(key);
        let start = self.points.partition_point(|(position, _)| *position < hash);
        let mut rejected: Vec<&NodeId> = Vec::new();

        for offset in 0..self.points.len() {
            let (_, node_id) = &self.points[(start + offset) % self.points.len()];

            if placement.contains(node_id) || rejected.contains(&node_id) {
                continue;
            }
            if !is_healthy(node_id) {
                rejected.push(node_id);
                continue;
            }

            placement.push(node_id.clone());
            if placement.len() == n || placement.len() + rejected.len() == self.node_count {
                break;
            }
        }

        placement
    }
}

/// Shared, atomically replaceable reference to the current ring.
pub struct RingHandle {
    current: ArcSwap<HashRing>,
    base_virtual_nodes: u32,
}

impl RingHandle {
    pub fn new(nodes: &[NodeSpec], base_virtual_nodes: u32) -> Self {
        Self {
            current: ArcSwap::from_pointee(HashRing::build(nodes, base_virtual_nodes)),
            base_virtual_nodes,
        }
    }

    pub fn snapshot(&self) -> Arc<HashRing> {
        self.current.load_full()
    }

    pub fn rebuild(&self, nodes: &[NodeSpec]) {
        let ring = HashRing::build(nodes, self.base_virtual_nodes);
        tracing::info!(
            nodes = ring.node_count(),
            virtual_nodes = ring.virtual_node_count(),
            "hash ring rebuilt"
        );
        self.current.store(Arc::new(ring));
    }
}
