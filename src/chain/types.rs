use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use super::client::NodeClient;
use crate::storage::types::StoreError;

/// Position of a neighbor relative to this node in the chain.
///
/// A node keeps at most one live connection per position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NeighborPos {
    /// The node immediately before us; source of forwarded writes and the
    /// peer that answers catch-up requests.
    Predecessor,
    /// The node immediately after us; target of forwarded writes.
    Successor,
    /// The last node of the chain; target of read-path version queries.
    Tail,
}

/// Where the node currently sits in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Head,
    Middle,
    Tail,
    /// Singleton chain: the node is both head and tail.
    HeadAndTail,
}

/// A connected neighbor: the live client plus the path it was dialed with.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub client: NodeClient,
    pub path: String,
}

/// Snapshot of the chain topology as last dictated by the coordinator.
///
/// The node keeps this behind a lock and hands out clones, so no caller ever
/// holds the lock across a network call.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub is_head: bool,
    pub is_tail: bool,
    pub neighbors: HashMap<NeighborPos, Neighbor>,
}

impl Topology {
    pub fn role(&self) -> Role {
        match (self.is_head, self.is_tail) {
            (true, true) => Role::HeadAndTail,
            (true, false) => Role::Head,
            (false, true) => Role::Tail,
            (false, false) => Role::Middle,
        }
    }

    pub fn neighbor(&self, pos: NeighborPos) -> Option<&Neighbor> {
        self.neighbors.get(&pos)
    }
}

/// Errors surfaced by node operations to RPC callers.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The key (or the exact version asked for) does not exist.
    #[error("that key does not exist")]
    NotFound,

    /// The operation is not valid for the role this node believes it has,
    /// or a required neighbor connection is missing. The coordinator is
    /// expected to reconcile.
    #[error("chain topology out of sync: {0}")]
    TopologyOutOfSync(&'static str),

    /// A forwarded item carried a different value for a version we already
    /// hold. Must not happen while the head is unique.
    #[error("conflicting value for version {version} of key {key}")]
    VersionConflict { key: String, version: u64 },

    /// A call to a neighbor or the tail failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The commit acknowledgment did not reach the head in time.
    #[error("deadline expired before the write was committed")]
    CommitDeadline,

    #[error(transparent)]
    Store(#[from] StoreError),
}
