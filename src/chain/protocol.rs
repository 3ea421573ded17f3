//! Chain Network Protocol
//!
//! Defines the API endpoints and Data Transfer Objects (DTOs) used between
//! replicas in the chain and for coordinator topology pushes.
//!
//! These structures are serialized via JSON and sent over HTTP. Public
//! endpoints are what clients call; `/internal/*` endpoints carry the chain
//! protocol itself (forwarded writes, commit acknowledgments, version queries
//! and catch-up transfers).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::NeighborPos;

// --- API Endpoints ---

/// Public endpoint for client writes. Only the head accepts these.
pub const ENDPOINT_WRITE: &str = "/write";
/// Public endpoint for client reads. Any replica answers.
pub const ENDPOINT_READ: &str = "/read";
/// Internal endpoint carrying a dirty item from predecessor to successor.
pub const ENDPOINT_FORWARD: &str = "/internal/forward";
/// Internal endpoint carrying a commit acknowledgment back toward the head.
pub const ENDPOINT_COMMIT: &str = "/internal/commit";
/// Internal endpoint answering read-path version queries (asked of the tail).
pub const ENDPOINT_LATEST: &str = "/internal/latest";
/// Internal endpoint serving one exact (key, version) item.
pub const ENDPOINT_ITEM: &str = "/internal/item";
/// Internal endpoint for pulling missing dirty items from a predecessor.
pub const ENDPOINT_FWD_PROPAGATE: &str = "/internal/fwd_propagate";
/// Internal endpoint for pulling missing committed items from a predecessor.
pub const ENDPOINT_BACK_PROPAGATE: &str = "/internal/back_propagate";
/// Internal endpoint for coordinator pushes of topology changes.
pub const ENDPOINT_UPDATE_NEIGHBOR: &str = "/internal/neighbor";

// --- Data Transfer Objects ---

/// Client request for writing a value. The head assigns the version.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientWriteRequest {
    pub key: String,
    pub value: Vec<u8>,
}

/// Acknowledgment of a client write.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientWriteResponse {
    /// The version the write was committed under; `None` when rejected.
    pub version: Option<u64>,
}

/// Response for client reads. `None` indicates the key does not exist.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadResponse {
    pub value: Option<Vec<u8>>,
}

/// A dirty item traveling head-to-tail.
///
/// Sent by a replica to its successor; the version was already assigned by
/// the head, so every hop stores it verbatim.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardWriteRequest {
    pub key: String,
    pub value: Vec<u8>,
    pub version: u64,
}

/// A commit acknowledgment traveling tail-to-head.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommitRequest {
    pub key: String,
    pub version: u64,
}

/// Standard acknowledgment for internal chain operations.
#[derive(Debug, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

/// Read-path version query for one key, answered by the tail.
#[derive(Debug, Serialize, Deserialize)]
pub struct LatestVersionRequest {
    pub key: String,
}

/// The tail's answer: its newest committed version for the key, if any.
#[derive(Debug, Serialize, Deserialize)]
pub struct LatestVersionResponse {
    pub version: Option<u64>,
}

/// Request for one exact (key, version) item.
#[derive(Debug, Serialize, Deserialize)]
pub struct ItemRequest {
    pub key: String,
    pub version: u64,
}

/// Response carrying the requested item, if the callee holds it.
#[derive(Debug, Serialize, Deserialize)]
pub struct ItemResponse {
    pub item: Option<ItemPayload>,
}

/// One stored version as it travels the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPayload {
    pub version: u64,
    pub committed: bool,
    pub value: Vec<u8>,
}

/// Catch-up request: for every key the caller holds, the versions it already
/// has in the relevant state (dirty or committed depending on the endpoint).
#[derive(Debug, Serialize, Deserialize)]
pub struct PropagateRequest {
    pub keys: HashMap<String, Vec<u64>>,
}

/// Catch-up response: the items the caller is missing, grouped by key.
#[derive(Debug, Serialize, Deserialize)]
pub struct PropagateResponse {
    pub items: HashMap<String, Vec<ItemPayload>>,
}

/// Coordinator push replacing one neighbor position.
///
/// An empty `path` clears the position: no predecessor means this node is the
/// head, no successor means it is the tail.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateNeighborRequest {
    pub position: NeighborPos,
    pub path: String,
}
