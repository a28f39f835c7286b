//! Replicated JSON key-value store.
//!
//! Writes are ordered through a Raft consensus group and applied by a
//! deterministic state machine to a per-node embedded engine; reads are
//! served from the local engine on any node. Only the leader accepts
//! writes and membership changes.

pub mod codec;
pub mod config;
pub mod engine;
pub mod http;
pub mod membership;
pub mod node;
pub mod raft;
pub mod router;
