//! Chain Replication Module
//!
//! Implements the replica node of a chain-replicated key-value store with
//! apportioned queries: writes enter at the head and commit at the tail,
//! while reads are served by any replica.
//!
//! ## Core Mechanisms
//! - **Version lifecycle**: every write becomes a dirty item that travels
//!   head-to-tail; the tail commits it and the acknowledgment travels back,
//!   flipping each replica's copy to committed.
//! - **Apportioned reads**: a replica answers from local committed state when
//!   it is provably current, and otherwise asks the tail which version is
//!   committed, keeping reads linearizable without funneling them all to one
//!   node.
//! - **Catch-up**: a node whose predecessor changed pulls the dirty items it
//!   lacks, then the commits it lacks, in that order.

pub mod client;
pub mod handlers;
pub mod node;
pub mod protocol;
pub mod types;

#[cfg(test)]
mod tests;
