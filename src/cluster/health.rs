use super::probe::HealthProbe;
use super::registry::NodeRegistry;
use super::types::{HealthTransition, NodeId, ProbeOutcome, StorageNode};

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// Periodically probes every storage node and records the result in the
/// registry. This is the only writer of node health.
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    probe: Box<dyn HealthProbe>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        probe: Box<dyn HealthProbe>,
        config: HealthConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            probe,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Starts the periodic loop. It exits once `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            failure_threshold = self.config.failure_threshold,
            nodes = self.registry.len(),
            "health monitor started"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.check_all() => {}
                    }
                }
            }
        }

        tracing::info!("health monitor stopped");
    }

    /// Runs one probe cycle: every node concurrently, each bounded by the
    /// probe timeout.
    pub async fn check_all(&self) {
        let nodes = self.registry.nodes();
        let probes = nodes.iter().map(|node| self.check_node(node));
        let outcomes = join_all(probes).await;

        for (node, outcome) in nodes.iter().zip(outcomes) {
            self.record(&node.id, outcome);
        }
    }

    async fn check_node(&self, node: &StorageNode) -> ProbeOutcome {
        match tokio::time::timeout(self.config.probe_timeout, self.probe.probe(node)).await {
            Ok(Ok(())) => ProbeOutcome::Reachable,
            Ok(Err(e)) => {
                tracing::debug!(node = %node.id, error = %e, "health probe failed");
                ProbeOutcome::Unreachable
            }
            Err(_) => {
                tracing::debug!(
                    node = %node.id,
                    timeout_ms = self.config.probe_timeout.as_millis() as u64,
                    "health probe timed out"
                );
                ProbeOutcome::Unreachable
            }
        }
    }

    /// Counts an externally observed failure (e.g. exhausted replication
    /// retries) toward the node's consecutive-failure threshold.
    pub fn report_failure(&self, id: &NodeId, reason: &str) {
        tracing::warn!(node = %id, reason, "storage node failure reported");
        self.record(id, ProbeOutcome::Unreachable);
    }

    pub fn report_success(&self, id: &NodeId) {
        self.record(id, ProbeOutcome::Reachable);
    }

    fn record(&self, id: &NodeId, outcome: ProbeOutcome) {
        match self
            .registry
            .record_probe(id, outcome, self.config.failure_threshold)
        {
            HealthTransition::BecameHealthy => {
                tracing::info!(node = %id, "storage node recovered");
            }
            HealthTransition::BecameUnhealthy => {
                tracing::warn!(
                    node = %id,
                    threshold = self.config.failure_threshold,
                    healthy_nodes = self.registry.healthy_nodes().len(),
                    "storage node marked unhealthy"
                );
            }
            HealthTransition::Unchanged => {}
        }
    }
}
