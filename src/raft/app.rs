use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    pin::Pin,
    time::Duration,
};

use anyhow::Context;
use serde_json::Value;
use tokio::sync::watch;

use crate::raft::types::{ApplyOutcome, NodeId, NodeMeta, TypeConfig};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Replica role as seen by callers of the consensus facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Leader,
    Follower,
    Candidate,
    Shutdown,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Leader => "Leader",
            Self::Follower => "Follower",
            Self::Candidate => "Candidate",
            Self::Shutdown => "Shutdown",
        }
    }
}

/// Capability boundary over the consensus core.
///
/// The command router and membership controller depend on this trait
/// only, so neither is coupled to a particular Raft library and tests
/// can substitute a local stand-in.
pub trait ConsensusHandle: Send + Sync + 'static {
    fn state(&self) -> NodeState;

    /// Submits a command payload for replication; resolves once the
    /// entry is committed and applied locally, or fails after `timeout`.
    /// Leader-only. A timed-out entry may still commit later.
    fn apply(&self, payload: Value, timeout: Duration)
    -> BoxFuture<'_, anyhow::Result<ApplyOutcome>>;

    fn add_voter(&self, node_id: NodeId, node: NodeMeta) -> BoxFuture<'_, anyhow::Result<()>>;

    fn remove_server(&self, node_id: NodeId) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Committed cluster configuration: every known member with its
    /// metadata.
    fn membership(&self) -> Vec<(NodeId, NodeMeta)>;

    /// Diagnostic counters. Always contains a `state` entry.
    fn stats(&self) -> BTreeMap<String, String>;

    fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>>;
}

#[derive(Clone)]
pub struct RaftConsensus {
    raft: openraft::Raft<TypeConfig>,
    metrics: watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>>,
}

impl RaftConsensus {
    pub fn new(raft: openraft::Raft<TypeConfig>) -> Self {
        let metrics = raft.metrics();
        Self { raft, metrics }
    }

    pub fn raft(&self) -> openraft::Raft<TypeConfig> {
        self.raft.clone()
    }

    pub fn metrics(&self) -> watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>> {
        self.metrics.clone()
    }

    /// Installs a single-server configuration containing only this node.
    /// Idempotent against an already-initialized cluster.
    pub async fn bootstrap_if_needed(
        &self,
        node_id: NodeId,
        node: NodeMeta,
    ) -> anyhow::Result<()> {
        let initialized = self
            .raft
            .is_initialized()
            .await
            .context("raft is_initialized")?;
        if initialized {
            return Ok(());
        }
        let mut nodes = BTreeMap::new();
        nodes.insert(node_id, node);
        self.raft
            .initialize(nodes)
            .await
            .map_err(|e| anyhow::anyhow!("raft initialize: {e}"))?;
        Ok(())
    }
}

impl ConsensusHandle for RaftConsensus {
    fn state(&self) -> NodeState {
        match self.metrics.borrow().state {
            openraft::ServerState::Leader => NodeState::Leader,
            openraft::ServerState::Candidate => NodeState::Candidate,
            openraft::ServerState::Follower | openraft::ServerState::Learner => {
                NodeState::Follower
            }
            openraft::ServerState::Shutdown => NodeState::Shutdown,
        }
    }

    fn apply(
        &self,
        payload: Value,
        timeout: Duration,
    ) -> BoxFuture<'_, anyhow::Result<ApplyOutcome>> {
        Box::pin(async move {
            let resp = tokio::time::timeout(timeout, self.raft.client_write(payload))
                .await
                .map_err(|_| anyhow::anyhow!("raft apply timed out after {timeout:?}"))?
                .map_err(|e| anyhow::anyhow!("raft client_write: {e}"))?;
            Ok(resp.data)
        })
    }

    fn add_voter(&self, node_id: NodeId, node: NodeMeta) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.raft
                .add_learner(node_id, node, false)
                .await
                .map_err(|e| anyhow::anyhow!("raft add_learner: {e}"))?;
            self.raft
                .change_membership(
                    openraft::ChangeMembers::AddVoterIds(BTreeSet::from([node_id])),
                    true,
                )
                .await
                .map_err(|e| anyhow::anyhow!("raft change_membership(add_voter): {e}"))?;
            Ok(())
        })
    }

    fn remove_server(&self, node_id: NodeId) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.raft
                .change_membership(
                    openraft::ChangeMembers::RemoveVoters(BTreeSet::from([node_id])),
                    false,
                )
                .await
                .map_err(|e| anyhow::anyhow!("raft change_membership(remove_server): {e}"))?;
            Ok(())
        })
    }

    fn membership(&self) -> Vec<(NodeId, NodeMeta)> {
        self.metrics
            .borrow()
            .membership_config
            .nodes()
            .map(|(id, node)| (*id, node.clone()))
            .collect()
    }

    fn stats(&self) -> BTreeMap<String, String> {
        let m = self.metrics.borrow().clone();
        let mut stats = BTreeMap::new();
        stats.insert("state".to_string(), self.state().as_str().to_string());
        stats.insert("node_id".to_string(), m.id.to_string());
        stats.insert("term".to_string(), m.current_term.to_string());
        stats.insert(
            "leader".to_string(),
            m.current_leader.map(|l| l.to_string()).unwrap_or_default(),
        );
        stats.insert(
            "last_log_index".to_string(),
            m.last_log_index.map(|i| i.to_string()).unwrap_or_default(),
        );
        stats.insert(
            "last_applied".to_string(),
            m.last_applied.map(|l| l.to_string()).unwrap_or_default(),
        );
        stats.insert(
            "snapshot".to_string(),
            m.snapshot.map(|l| l.to_string()).unwrap_or_default(),
        );
        stats.insert(
            "membership".to_string(),
            m.membership_config
                .nodes()
                .map(|(id, _node)| id.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        stats
    }

    fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.raft
                .shutdown()
                .await
                .map_err(|e| anyhow::anyhow!("raft shutdown: {e}"))?;
            Ok(())
        })
    }
}

/// A test-only consensus facade that interprets commands directly
/// against the local engine, skipping replication.
pub struct LocalConsensus {
    engine: crate::engine::KvEngine,
    state: std::sync::Mutex<NodeState>,
}

impl LocalConsensus {
    pub fn new(engine: crate::engine::KvEngine) -> Self {
        Self {
            engine,
            state: std::sync::Mutex::new(NodeState::Leader),
        }
    }

    pub fn set_state(&self, state: NodeState) {
        *self.state.lock().expect("state lock") = state;
    }
}

impl ConsensusHandle for LocalConsensus {
    fn state(&self) -> NodeState {
        *self.state.lock().expect("state lock")
    }

    fn apply(
        &self,
        payload: Value,
        _timeout: Duration,
    ) -> BoxFuture<'_, anyhow::Result<ApplyOutcome>> {
        Box::pin(async move {
            Ok(crate::raft::storage::state_machine::apply_command(
                &self.engine,
                payload,
            ))
        })
    }

    fn add_voter(&self, _node_id: NodeId, _node: NodeMeta) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn remove_server(&self, _node_id: NodeId) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn membership(&self) -> Vec<(NodeId, NodeMeta)> {
        vec![(1, NodeMeta::default())]
    }

    fn stats(&self) -> BTreeMap<String, String> {
        let mut stats = BTreeMap::new();
        stats.insert("state".to_string(), self.state().as_str().to_string());
        stats
    }

    fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}
