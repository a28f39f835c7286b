use std::sync::Arc;

use anyhow::Context;

use crate::{
    config::Config,
    engine::KvEngine,
    raft::{
        app::RaftConsensus,
        network_http::HttpNetworkFactory,
        storage::{KvStateMachine, MemLogStore},
        types::TypeConfig,
    },
};

/// Builds the consensus core: validated config, in-memory log store,
/// engine-backed state machine, HTTP peer transport.
///
/// Cluster initialization is left to the caller; it depends on whether
/// this node bootstraps a new cluster or joins an existing one.
pub async fn start_raft(
    config: &Config,
    engine: KvEngine,
    network: HttpNetworkFactory,
) -> anyhow::Result<RaftConsensus> {
    let raft_config = openraft::Config {
        cluster_name: config.cluster_name.clone(),
        heartbeat_interval: config.heartbeat_interval_ms,
        election_timeout_min: config.election_timeout_min_ms,
        election_timeout_max: config.election_timeout_max_ms,
        ..Default::default()
    }
    .validate()
    .map_err(|e| anyhow::anyhow!("raft config validate: {e}"))?;
    let raft_config = Arc::new(raft_config);

    let log_store = MemLogStore::default();
    let state_machine = KvStateMachine::open(
        engine,
        config.snapshot_dir(),
        config.max_snapshots as usize,
    )
    .await
    .map_err(|e| anyhow::anyhow!("open state machine: {e}"))?;

    let raft = openraft::Raft::<TypeConfig>::new(
        config.node_id,
        raft_config,
        network,
        log_store,
        state_machine,
    )
    .await
    .context("start raft")?;

    Ok(RaftConsensus::new(raft))
}
