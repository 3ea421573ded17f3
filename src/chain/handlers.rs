//! Chain API Handlers
//!
//! HTTP endpoints that expose one replica's operations to clients, to its
//! neighbors in the chain, and to the coordinator.
//!
//! They act as the bridge between the Axum web framework and the logic in
//! `node.rs`: each handler translates a request DTO into a node call and maps
//! the node's error surface onto HTTP status codes.

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

use super::node::ChainNode;
use super::protocol::{
    Ack, ClientWriteRequest, ClientWriteResponse, CommitRequest, ENDPOINT_BACK_PROPAGATE,
    ENDPOINT_COMMIT, ENDPOINT_FORWARD, ENDPOINT_FWD_PROPAGATE, ENDPOINT_ITEM, ENDPOINT_LATEST,
    ENDPOINT_READ, ENDPOINT_UPDATE_NEIGHBOR, ENDPOINT_WRITE, ForwardWriteRequest, ItemPayload,
    ItemRequest, ItemResponse, LatestVersionRequest, LatestVersionResponse, PropagateRequest,
    PropagateResponse, ReadResponse, UpdateNeighborRequest,
};
use super::types::NodeError;
use crate::storage::types::StoreError;

/// Builds the HTTP router exposing the full chain protocol for one node.
pub fn router(node: Arc<ChainNode>) -> Router {
    Router::new()
        .route(ENDPOINT_WRITE, post(handle_client_write))
        .route(&format!("{}/:key", ENDPOINT_READ), get(handle_client_read))
        .route(ENDPOINT_FORWARD, post(handle_forward))
        .route(ENDPOINT_COMMIT, post(handle_commit))
        .route(ENDPOINT_LATEST, post(handle_latest_version))
        .route(ENDPOINT_ITEM, post(handle_item))
        .route(ENDPOINT_FWD_PROPAGATE, post(handle_fwd_propagate))
        .route(ENDPOINT_BACK_PROPAGATE, post(handle_back_propagate))
        .route(ENDPOINT_UPDATE_NEIGHBOR, post(handle_update_neighbor))
        .layer(Extension(node))
}

fn status_for(err: &NodeError) -> StatusCode {
    match err {
        NodeError::NotFound | NodeError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
        NodeError::TopologyOutOfSync(_)
        | NodeError::VersionConflict { .. }
        | NodeError::Store(_) => StatusCode::CONFLICT,
        NodeError::Transport(_) => StatusCode::BAD_GATEWAY,
        NodeError::CommitDeadline => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// Public write entry point. Valid only at the head.
pub async fn handle_client_write(
    Extension(node): Extension<Arc<ChainNode>>,
    Json(req): Json<ClientWriteRequest>,
) -> (StatusCode, Json<ClientWriteResponse>) {
    match node.client_write(&req.key, req.value).await {
        Ok(version) => (
            StatusCode::OK,
            Json(ClientWriteResponse {
                version: Some(version),
            }),
        ),
        Err(e) => {
            tracing::error!("client write for {} rejected: {}", req.key, e);
            (status_for(&e), Json(ClientWriteResponse { version: None }))
        }
    }
}

/// Public read entry point. Any replica answers, consulting the tail when
/// its local state is ambiguous.
pub async fn handle_client_read(
    Extension(node): Extension<Arc<ChainNode>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<ReadResponse>) {
    match node.client_read(&key).await {
        Ok(value) => (StatusCode::OK, Json(ReadResponse { value: Some(value) })),
        Err(NodeError::NotFound) => (StatusCode::NOT_FOUND, Json(ReadResponse { value: None })),
        Err(e) => {
            tracing::error!("read for {} failed: {}", key, e);
            (status_for(&e), Json(ReadResponse { value: None }))
        }
    }
}

/// Internal endpoint: a dirty item forwarded by our predecessor.
pub async fn handle_forward(
    Extension(node): Extension<Arc<ChainNode>>,
    Json(req): Json<ForwardWriteRequest>,
) -> (StatusCode, Json<Ack>) {
    match node.apply_forward(&req.key, req.value, req.version).await {
        Ok(()) => (StatusCode::OK, Json(Ack { success: true })),
        Err(e) => {
            tracing::error!("forward of {}@{} rejected: {}", req.key, req.version, e);
            (status_for(&e), Json(Ack { success: false }))
        }
    }
}

/// Internal endpoint: a commit acknowledgment arriving from our successor.
pub async fn handle_commit(
    Extension(node): Extension<Arc<ChainNode>>,
    Json(req): Json<CommitRequest>,
) -> (StatusCode, Json<Ack>) {
    match node.apply_commit(&req.key, req.version).await {
        Ok(()) => (StatusCode::OK, Json(Ack { success: true })),
        Err(e) => {
            tracing::warn!("commit of {}@{} not applied: {}", req.key, req.version, e);
            (status_for(&e), Json(Ack { success: false }))
        }
    }
}

/// Internal endpoint: read-path version query, asked of the tail.
pub async fn handle_latest_version(
    Extension(node): Extension<Arc<ChainNode>>,
    Json(req): Json<LatestVersionRequest>,
) -> (StatusCode, Json<LatestVersionResponse>) {
    match node.latest_committed(&req.key) {
        Some(version) => (
            StatusCode::OK,
            Json(LatestVersionResponse {
                version: Some(version),
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(LatestVersionResponse { version: None }),
        ),
    }
}

/// Internal endpoint: one exact (key, version) item.
pub async fn handle_item(
    Extension(node): Extension<Arc<ChainNode>>,
    Json(req): Json<ItemRequest>,
) -> (StatusCode, Json<ItemResponse>) {
    match node.local_item(&req.key, req.version) {
        Some(item) => (
            StatusCode::OK,
            Json(ItemResponse {
                item: Some(ItemPayload {
                    version: item.version,
                    committed: item.committed,
                    value: item.value,
                }),
            }),
        ),
        None => (StatusCode::NOT_FOUND, Json(ItemResponse { item: None })),
    }
}

/// Internal endpoint: a joining successor pulls the dirty items it lacks.
pub async fn handle_fwd_propagate(
    Extension(node): Extension<Arc<ChainNode>>,
    Json(req): Json<PropagateRequest>,
) -> (StatusCode, Json<PropagateResponse>) {
    match node.fwd_propagation(&req) {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(e) => {
            tracing::error!("forward propagation request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PropagateResponse {
                    items: Default::default(),
                }),
            )
        }
    }
}

/// Internal endpoint: a joining successor pulls the commits it lacks.
pub async fn handle_back_propagate(
    Extension(node): Extension<Arc<ChainNode>>,
    Json(req): Json<PropagateRequest>,
) -> (StatusCode, Json<PropagateResponse>) {
    match node.back_propagation(&req) {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(e) => {
            tracing::error!("back propagation request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PropagateResponse {
                    items: Default::default(),
                }),
            )
        }
    }
}

/// Internal endpoint: the coordinator replaces one neighbor position.
pub async fn handle_update_neighbor(
    Extension(node): Extension<Arc<ChainNode>>,
    Json(req): Json<UpdateNeighborRequest>,
) -> (StatusCode, Json<Ack>) {
    match node.apply_neighbor_update(req.position, &req.path).await {
        Ok(()) => (StatusCode::OK, Json(Ack { success: true })),
        Err(e) => {
            tracing::error!("neighbor update {:?} -> {:?} failed: {}", req.position, req.path, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Ack { success: false }),
            )
        }
    }
}
