//! Coordinator Wire Protocol
//!
//! The shapes exchanged with the chain coordinator. The coordinator itself is
//! an external service; the node only announces itself and applies whatever
//! role and neighbor assignment comes back.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Coordinator endpoint a node announces itself to when joining the chain.
pub const ENDPOINT_ADD_NODE: &str = "/add_node";

// --- Data Transfer Objects ---

/// Registration request: the reachable host:port of the announcing node.
#[derive(Debug, Serialize, Deserialize)]
pub struct AddNodeRequest {
    pub path: String,
}

/// Role and neighbor assignment for one node.
///
/// Returned from registration and reused by the coordinator when it pushes
/// topology changes. Empty path strings mean "none": no predecessor makes the
/// node the head, and a tail path is only present for non-tail nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMeta {
    pub is_head: bool,
    pub is_tail: bool,
    /// Path of the chain's tail, used for read-path version queries.
    pub tail_path: String,
    /// Path of this node's predecessor.
    pub prev_path: String,
}
