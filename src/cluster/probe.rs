use super::types::StorageNode;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;

/// Reachability check for a single storage node.
///
/// Implementations should not enforce their own deadline; the monitor wraps
/// each call in its probe timeout.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, node: &StorageNode) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Tcp,
    Http,
}

pub fn probe_for(kind: ProbeKind, timeout: Duration) -> Box<dyn HealthProbe> {
    match kind {
        ProbeKind::Tcp => Box::new(TcpProbe),
        ProbeKind::Http => Box::new(HttpProbe::new(timeout)),
    }
}

/// Opens and immediately drops a TCP connection to the node address.
pub struct TcpProbe;

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, node: &StorageNode) -> Result<()> {
        TcpStream::connect(&node.address)
            .await
            .with_context(|| format!("tcp connect to {} failed", node.address))?;
        Ok(())
    }
}

/// Calls `GET http://{address}/health` on a peer's admin API.
pub struct HttpProbe {
    http_client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http_client }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, node: &StorageNode) -> Result<()> {
        let url = format!("http://{}/health", node.address);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("health request to {} failed", url))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "health endpoint {} returned {}",
                url,
                response.status()
            ));
        }
        Ok(())
    }
}
