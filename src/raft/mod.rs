//! Consensus layer: openraft wiring, storage adapters, peer transport,
//! and the capability facade the rest of the crate consumes.

pub mod app;
pub mod http_rpc;
pub mod network_http;
pub mod runtime;
pub mod storage;
pub mod types;

pub use app::{ConsensusHandle, NodeState, RaftConsensus};
pub use types::{ApplyOutcome, CommandPayload, NodeId, NodeMeta, TypeConfig};
