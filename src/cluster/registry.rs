use super::types::{HealthTransition, NodeId, NodeSpec, ProbeOutcome, StorageNode, now_ms};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

/// Catalog of the configured storage nodes and their health.
///
/// Reads are lock-free per node. Health fields are mutated only through
/// `record_probe`, which is restricted to the cluster module so that the
/// `HealthMonitor` stays the single writer.
pub struct NodeRegistry {
    nodes: DashMap<NodeId, StorageNode>,
    /// Configuration order, used by static placement and listings.
    order: ArcSwap<Vec<NodeId>>,
}

impl NodeRegistry {
    pub fn new(specs: Vec<NodeSpec>) -> Arc<Self> {
        let registry = Arc::new(Self {
            nodes: DashMap::new(),
            order: ArcSwap::from_pointee(Vec::new()),
        });
        registry.replace(specs);
        registry
    }

    /// Replaces the node set with `specs`.
    ///
    /// Nodes that survive the reload keep their health state; new nodes start
    /// healthy; nodes absent from `specs` are dropped.
    pub fn replace(&self, specs: Vec<NodeSpec>) {
        let mut order = Vec::with_capacity(specs.len());

        for spec in specs {
            let id = spec.id.clone();
            if order.contains(&id) {
                tracing::warn!(node = %id, "duplicate storage node id in configuration, ignoring");
                continue;
            }

            let mut node = StorageNode::from_spec(spec);
            if let Some(existing) = self.nodes.get(&id) {
                node.healthy = existing.healthy;
                node.last_checked_at = existing.last_checked_at;
                node.consecutive_failures = existing.consecutive_failures;
            }
            self.nodes.insert(id.clone(), node);
            order.push(id);
        }

        self.nodes.retain(|id, _| order.contains(id));
        self.order.store(Arc::new(order));
    }

    pub fn get(&self, id: &NodeId) -> Option<StorageNode> {
        self.nodes.get(id).map(|entry| entry.value().clone())
    }

    /// Unknown nodes are never healthy.
    pub fn is_healthy(&self, id: &NodeId) -> bool {
        self.nodes
            .get(id)
            .map(|entry| entry.value().healthy)
            .unwrap_or(false)
    }

    pub fn nodes(&self) -> Vec<StorageNode> {
        self.order
            .load()
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.order.load().as_ref().clone()
    }

    pub fn healthy_nodes(&self) -> Vec<StorageNode> {
        self.nodes().into_iter().filter(|node| node.healthy).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Applies one probe outcome: one success heals, `failure_threshold`
    /// consecutive failures mark the node unhealthy.
    pub(super) fn record_probe(
        &self,
        id: &NodeId,
        outcome: ProbeOutcome,
        failure_threshold: u32,
    ) -> HealthTransition {
        let Some(mut node) = self.nodes.get_mut(id) else {
            return HealthTransition::Unchanged;
        };

        node.last_checked_at = Some(now_ms());

        match outcome {
            ProbeOutcome::Reachable => {
                node.consecutive_failures = 0;
                if node.healthy {
                    HealthTransition::Unchanged
                } else {
                    node.healthy = true;
                    HealthTransition::BecameHealthy
                }
            }
            ProbeOutcome::Unreachable => {
                node.consecutive_failures = node.consecutive_failures.saturating_add(1);
                if node.healthy && node.consecutive_failures >= failure_threshold.max(1) {
                    node.healthy = false;
                    HealthTransition::BecameUnhealthy
                } else {
                    HealthTransition::Unchanged
                }
            }
        }
    }
}
