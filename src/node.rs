use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, sync::{Mutex, oneshot}, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::Config,
    engine::{EngineOptions, KvEngine},
    http::{AppState, build_api_router},
    membership::MembershipController,
    raft::{
        app::{ConsensusHandle, RaftConsensus},
        http_rpc::{RpcState, build_raft_rpc_router},
        network_http::HttpNetworkFactory,
        runtime::start_raft,
        types::NodeMeta,
    },
    router::CommandRouter,
};

struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<anyhow::Result<()>>,
}

impl ServerHandle {
    async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.join
            .await
            .context("join http server task")?
            .context("http server exited with error")?;
        Ok(())
    }
}

async fn spawn_server(bind: SocketAddr, router: Router) -> anyhow::Result<ServerHandle> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    let addr = listener.local_addr().context("listener local_addr")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .map_err(|e| anyhow::anyhow!("axum serve: {e}"))?;
        Ok(())
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        join,
    })
}

struct Running {
    engine: KvEngine,
    consensus: RaftConsensus,
    rpc_server: ServerHandle,
    api_server: ServerHandle,
}

/// One process-level node: engine, consensus core, Raft RPC listener,
/// client API listener.
pub struct Node {
    config: Config,
    running: Mutex<Option<Running>>,
}

impl Node {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    /// Brings the node up. Fails when the node is already running.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            anyhow::bail!("node already running");
        }

        let engine = KvEngine::open(EngineOptions {
            dir: self.config.engine_dir(),
            create_if_missing: true,
        })
        .context("open engine")?;

        let consensus = start_raft(&self.config, engine.clone(), HttpNetworkFactory::new())
            .await
            .context("start raft")?;

        let rpc_server = spawn_server(
            self.config.raft_bind,
            build_raft_rpc_router(RpcState {
                raft: consensus.raft(),
            }),
        )
        .await
        .context("start raft rpc listener")?;

        if self.config.bootstrap {
            let raft_addr = if self.config.raft_advertise.is_empty() {
                format!("http://{}", rpc_server.addr)
            } else {
                self.config.raft_advertise.clone()
            };
            consensus
                .bootstrap_if_needed(
                    self.config.node_id,
                    NodeMeta {
                        name: self.config.node_name.clone(),
                        raft_addr,
                    },
                )
                .await
                .context("bootstrap cluster")?;
        }

        let consensus_handle: Arc<dyn ConsensusHandle> = Arc::new(consensus.clone());
        let router = Arc::new(CommandRouter::new(
            consensus_handle.clone(),
            engine.clone(),
            self.config.apply_timeout(),
        ));
        let membership = Arc::new(MembershipController::new(consensus_handle.clone()));

        let api_server = spawn_server(
            self.config.http_bind,
            build_api_router(AppState {
                router,
                membership,
                consensus: consensus_handle,
            }),
        )
        .await
        .context("start api listener")?;

        info!(
            node_id = self.config.node_id,
            api = %api_server.addr,
            raft = %rpc_server.addr,
            bootstrap = self.config.bootstrap,
            "node started"
        );

        *guard = Some(Running {
            engine,
            consensus,
            rpc_server,
            api_server,
        });
        Ok(())
    }

    /// Brings the node down: listeners first, then the consensus core,
    /// then the engine. Idempotent; a node that is not running is a
    /// no-op.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut guard = self.running.lock().await;
        let Some(running) = guard.take() else {
            return Ok(());
        };

        if let Err(err) = running.api_server.shutdown().await {
            warn!(%err, "api listener shutdown");
        }
        if let Err(err) = running.rpc_server.shutdown().await {
            warn!(%err, "raft rpc listener shutdown");
        }
        if let Err(err) = running.consensus.shutdown().await {
            warn!(%err, "raft shutdown");
        }
        running.engine.close().context("close engine")?;

        info!(node_id = self.config.node_id, "node stopped");
        Ok(())
    }

    /// Actual client API address, once started (useful when binding
    /// port 0).
    pub async fn api_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.api_server.addr)
    }

    /// Actual Raft RPC address, once started.
    pub async fn raft_rpc_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.rpc_server.addr)
    }
}
