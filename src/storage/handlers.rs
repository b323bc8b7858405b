use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;

use super::protocol::{
    ENDPOINT_HEALTH, ENDPOINT_NODES, ENDPOINT_PLACEMENT, ErrorResponse, HealthResponse,
    NodeStatus, NodesResponse, PlacementResponse,
};
use super::service::GitStorage;
use super::types::{RepositoryKey, StorageError};
use crate::cluster::{Cluster, NodeId};

/// Shared state behind the admin routes.
pub struct AdminState {
    pub node_id: NodeId,
    pub storage: Arc<dyn GitStorage>,
    /// `None` in local mode.
    pub cluster: Option<Arc<Cluster>>,
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route(ENDPOINT_HEALTH, get(handle_health))
        .route(ENDPOINT_NODES, get(handle_nodes))
        .route(ENDPOINT_PLACEMENT, get(handle_placement))
        .layer(Extension(state))
}

pub async fn handle_health(Extension(state): Extension<Arc<AdminState>>) -> Json<HealthResponse> {
    let mode = if state.cluster.is_some() {
        "distributed"
    } else {
        "local"
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.node_id.to_string(),
        mode: mode.to_string(),
    })
}

pub async fn handle_nodes(Extension(state): Extension<Arc<AdminState>>) -> Json<NodesResponse> {
    let nodes = state
        .cluster
        .as_ref()
        .map(|cluster| {
            cluster
                .registry()
                .nodes()
                .into_iter()
                .map(|node| NodeStatus {
                    id: node.id.to_string(),
                    address: node.address,
                    weight: node.weight,
                    root: node.root.display().to_string(),
                    healthy: node.healthy,
                    last_checked_at: node.last_checked_at,
                    consecutive_failures: node.consecutive_failures,
                })
                .collect()
        })
        .unwrap_or_default();

    Json(NodesResponse { nodes })
}

pub async fn handle_placement(
    Extension(state): Extension<Arc<AdminState>>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<PlacementResponse>, (StatusCode, Json<ErrorResponse>)> {
    let key = match RepositoryKey::parse(&format!("{}/{}", owner, name)) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!("Rejected placement query: {}", e);
            return Err(error(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    match state.storage.resolve(&key) {
        Ok(placement) => Ok(Json(PlacementResponse {
            repository: key.to_string(),
            nodes: placement.nodes.iter().map(|id| id.to_string()).collect(),
        })),
        Err(e @ StorageError::NoHealthyNode(_)) => {
            tracing::warn!("Placement query failed: {}", e);
            Err(error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e) => {
            tracing::error!("Placement query failed: {}", e);
            Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn error(status: StatusCode, message: String) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: message }))
}
