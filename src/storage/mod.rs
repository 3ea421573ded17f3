//! Versioned Key-Value Storage Module
//!
//! Implements the storage layer a chain replica builds on. Every key maps to a
//! sequence of versions, each of which is either *dirty* (accepted but not yet
//! acknowledged by the tail) or *committed* (stable, visible to reads).
//!
//! ## Core Concepts
//! - **Versioned items**: a write never overwrites in place; it adds a new
//!   `Item` with a higher version number.
//! - **Two-phase visibility**: items enter as dirty and become committed when
//!   the commit acknowledgment travels back up the chain.
//! - **Enumeration**: the catch-up protocol pulls state diffs via the
//!   `all_newer_*` queries, keyed by the versions the caller already holds.
//!
//! The `Store` trait is the contract a backend must satisfy; `MemStore` is the
//! in-memory backend used by the node binary.

pub mod memory;
pub mod types;


use std::collections::HashMap;

use types::{Item, StoreError};

/// Operations a storage backend must provide to the chain node.
///
/// Implementations must be safe for concurrent use; writes and commits for the
/// same key are serialized by the backend, and writers for distinct keys must
/// not block each other.
pub trait Store: Send + Sync {
    /// Returns the newest committed item for the key.
    ///
    /// Returns `StoreError::Dirty` when the key only has uncommitted
    /// versions, and `StoreError::NotFound` when no version exists at all.
    fn read(&self, key: &str) -> Result<Item, StoreError>;

    /// Returns the exact item for (key, version).
    fn read_version(&self, key: &str, version: u64) -> Result<Item, StoreError>;

    /// Inserts a new dirty item. Fails with `VersionExists` if the version is
    /// already present or was already superseded by a newer committed version.
    fn write(&self, key: &str, value: Vec<u8>, version: u64) -> Result<(), StoreError>;

    /// Marks (key, version) as committed and drops strictly older versions.
    ///
    /// Idempotent: committing an already-committed or superseded version
    /// succeeds without changing anything. Fails with `NotFound` when the
    /// version was never seen.
    fn commit(&self, key: &str, version: u64) -> Result<(), StoreError>;

    /// Returns every dirty item across all keys.
    fn all_dirty(&self) -> Result<Vec<Item>, StoreError>;

    /// Returns every committed item across all keys.
    fn all_committed(&self) -> Result<Vec<Item>, StoreError>;

    /// Returns every dirty item newer than the highest version the caller
    /// claims to hold for its key. Keys absent from `known` are returned in
    /// full.
    fn all_newer_dirty(&self, known: &HashMap<String, Vec<u64>>) -> Result<Vec<Item>, StoreError>;

    /// Committed-state counterpart of [`Store::all_newer_dirty`].
    fn all_newer_committed(
        &self,
        known: &HashMap<String, Vec<u64>>,
    ) -> Result<Vec<Item>, StoreError>;
}
