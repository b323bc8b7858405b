use super::registry::NodeRegistry;
use super::ring::RingHandle;
use super::types::{NodeId, NodeSpec};

use std::sync::Arc;

/// How repository keys are mapped to storage nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// Weighted consistent hashing over the ring.
    ConsistentHash,
    /// The local node first, then the other nodes in configuration order.
    Static,
}

/// Node registry plus ring: answers "which nodes hold this key".
pub struct Cluster {
    local_node: NodeId,
    registry: Arc<NodeRegistry>,
    ring: RingHandle,
    strategy: PlacementStrategy,
    replication_count: usize,
}

impl Cluster {
    pub fn new(
        local_node: NodeId,
        specs: Vec<NodeSpec>,
        strategy: PlacementStrategy,
        replication_count: usize,
        base_virtual_nodes: u32,
    ) -> Arc<Self> {
        let ring = RingHandle::new(&specs, base_virtual_nodes);
        let registry = NodeRegistry::new(specs);

        Arc::new(Self {
            local_node,
            registry,
            ring,
            strategy,
            replication_count: replication_count.max(1),
        })
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn replication_count(&self) -> usize {
        self.replication_count
    }

    pub fn strategy(&self) -> PlacementStrategy {
        self.strategy
    }

    /// Ordered list of up to `n` distinct healthy nodes for `key`.
    ///
    /// Health is read at lookup time, so a node marked unhealthy disappears
    /// from the next lookup without a ring rebuild.
    pub fn lookup(&self, key: &str, n: usize) -> Vec<NodeId> {
        match self.strategy {
            PlacementStrategy::ConsistentHash => {
                let ring = self.ring.snapshot();
                ring.lookup(key, n, |id| self.registry.is_healthy(id))
            }
            PlacementStrategy::Static => self.static_lookup(n),
        }
    }

    /// Placement with the configured replication count. Logs when fewer
    /// healthy nodes than requested are available.
    pub fn placement_for(&self, key: &str) -> Vec<NodeId> {
        let nodes = self.lookup(key, self.replication_count);
        if !nodes.is_empty() && nodes.len() < self.replication_count {
            tracing::warn!(
                key,
                wanted = self.replication_count,
                available = nodes.len(),
                "degraded replication: not enough healthy storage nodes"
            );
        }
        nodes
    }

    fn static_lookup(&self, n: usize) -> Vec<NodeId> {
        let mut ids = self.registry.node_ids();
        if let Some(pos) = ids.iter().position(|id| id == &self.local_node) {
            let local = ids.remove(pos);
            ids.insert(0, local);
        }

        ids.into_iter()
            .filter(|id| self.registry.is_healthy(id))
            .take(n)
            .collect()
    }

    /// Replaces the node set and publishes a freshly built ring.
    ///
    /// The ring is swapped before the registry. In between, removed nodes
    /// are already off the ring and added nodes are still unknown to the
    /// registry (so treated as unhealthy); a lookup never returns a node
    /// outside the new set.
    pub fn reload(&self, specs: Vec<NodeSpec>) {
        self.ring.rebuild(&specs);
        self.registry.replace(specs);
        tracing::info!(nodes = self.registry.len(), "storage node set reloaded");
    }
}
