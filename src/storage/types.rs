use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One stored version of a key.
///
/// A key may hold several versions at once while a write travels the chain:
/// the committed one that reads see, plus newer dirty ones still waiting for
/// the tail's acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// The key this version belongs to.
    pub key: String,
    /// Monotonically increasing version number, assigned by the head.
    pub version: u64,
    /// `false` while the version is dirty; `true` once the tail acknowledged.
    pub committed: bool,
    /// Opaque payload.
    pub value: Vec<u8>,
}

/// Signals returned by a storage backend.
///
/// `NotFound` and `Dirty` are part of the normal read flow rather than
/// failures; the read path uses them to decide whether the tail must be
/// consulted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No version exists for the key, or the exact version asked for is gone.
    #[error("that key does not exist")]
    NotFound,

    /// The newest version of the key has not been committed yet.
    #[error("key has an uncommitted version")]
    Dirty,

    /// The (key, version) slot is already taken or was superseded.
    #[error("version {version} of key {key} already exists")]
    VersionExists { key: String, version: u64 },
}
