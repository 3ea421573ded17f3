//! Coordinator Integration Module
//!
//! The chain coordinator is the external authority over membership and
//! neighbor assignments. This module holds the client used to announce the
//! node at startup and the wire shapes shared with coordinator pushes.

pub mod client;
pub mod protocol;
