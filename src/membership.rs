use std::sync::Arc;

use tracing::info;

use crate::raft::{
    app::{ConsensusHandle, NodeState},
    types::{NodeId, NodeMeta},
};

#[derive(Debug)]
pub enum MembershipError {
    NotLeader,
    UnknownNode(NodeId),
    Raft(anyhow::Error),
}

impl std::fmt::Display for MembershipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLeader => write!(f, "not the leader"),
            Self::UnknownNode(id) => write!(f, "node {id} is not a cluster member"),
            Self::Raft(e) => write!(f, "membership change failed: {e}"),
        }
    }
}

impl std::error::Error for MembershipError {}

/// Leader-only voter management: join at cluster growth, drop at
/// shrink. Cluster creation itself goes through
/// [`crate::raft::RaftConsensus::bootstrap_if_needed`].
pub struct MembershipController {
    raft: Arc<dyn ConsensusHandle>,
}

impl MembershipController {
    pub fn new(raft: Arc<dyn ConsensusHandle>) -> Self {
        Self { raft }
    }

    /// Adds `node_id` as a voter. Resolves once the configuration
    /// change commits; an already-present voter surfaces the
    /// underlying library error unchanged.
    pub async fn join(&self, node_id: NodeId, raft_addr: String) -> Result<(), MembershipError> {
        if self.raft.state() != NodeState::Leader {
            return Err(MembershipError::NotLeader);
        }

        let members = self.raft.membership();
        info!(node_id, %raft_addr, members = members.len(), "joining voter");

        let node = NodeMeta {
            name: format!("node-{node_id}"),
            raft_addr,
        };
        self.raft
            .add_voter(node_id, node)
            .await
            .map_err(MembershipError::Raft)
    }

    /// Removes `node_id` from the voters. Dropping the current leader
    /// is allowed and triggers a new election among the remaining
    /// voters once the removal entry commits.
    pub async fn drop_node(&self, node_id: NodeId) -> Result<(), MembershipError> {
        if self.raft.state() != NodeState::Leader {
            return Err(MembershipError::NotLeader);
        }

        let members = self.raft.membership();
        if !members.iter().any(|(id, _node)| *id == node_id) {
            return Err(MembershipError::UnknownNode(node_id));
        }
        info!(node_id, members = members.len(), "dropping voter");

        self.raft
            .remove_server(node_id)
            .await
            .map_err(MembershipError::Raft)
    }
}
