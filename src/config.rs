use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "replikv",
    about = "Replicated JSON key-value store",
    disable_help_subcommand = true
)]
pub struct Config {
    /// Raft node id; must be unique in the cluster and stable across
    /// restarts.
    #[arg(long, env = "REPLIKV_NODE_ID", value_name = "ID", default_value_t = 1)]
    pub node_id: u64,

    #[arg(
        long,
        env = "REPLIKV_NODE_NAME",
        value_name = "NAME",
        default_value = "node-1"
    )]
    pub node_name: String,

    #[arg(
        long,
        env = "REPLIKV_CLUSTER_NAME",
        value_name = "NAME",
        default_value = "replikv"
    )]
    pub cluster_name: String,

    /// Client-facing HTTP API listener.
    #[arg(
        long,
        env = "REPLIKV_HTTP_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:8080"
    )]
    pub http_bind: SocketAddr,

    /// Node-to-node Raft RPC listener.
    #[arg(
        long,
        env = "REPLIKV_RAFT_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:7080"
    )]
    pub raft_bind: SocketAddr,

    /// Base URL peers use to reach this node's Raft RPC listener.
    /// Defaults to the bound Raft RPC address.
    #[arg(
        long,
        env = "REPLIKV_RAFT_ADVERTISE",
        value_name = "URL",
        default_value = ""
    )]
    pub raft_advertise: String,

    #[arg(
        long,
        env = "REPLIKV_DATA_DIR",
        value_name = "PATH",
        default_value = "./data"
    )]
    pub data_dir: PathBuf,

    /// Seed a new single-node cluster on first start. Idempotent when
    /// the cluster is already initialized.
    #[arg(
        long,
        env = "REPLIKV_BOOTSTRAP",
        value_name = "BOOL",
        default_value_t = false,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub bootstrap: bool,

    #[arg(
        long = "heartbeat-interval-ms",
        env = "REPLIKV_HEARTBEAT_INTERVAL_MS",
        value_name = "MS",
        default_value_t = 500
    )]
    pub heartbeat_interval_ms: u64,

    #[arg(
        long = "election-timeout-min-ms",
        env = "REPLIKV_ELECTION_TIMEOUT_MIN_MS",
        value_name = "MS",
        default_value_t = 1_500
    )]
    pub election_timeout_min_ms: u64,

    #[arg(
        long = "election-timeout-max-ms",
        env = "REPLIKV_ELECTION_TIMEOUT_MAX_MS",
        value_name = "MS",
        default_value_t = 3_000
    )]
    pub election_timeout_max_ms: u64,

    /// How long a write waits for commit before reporting failure. The
    /// entry may still commit after the deadline.
    #[arg(
        long = "apply-timeout-ms",
        env = "REPLIKV_APPLY_TIMEOUT_MS",
        value_name = "MS",
        default_value_t = 500,
        value_parser = clap::value_parser!(u64).range(50..=60_000)
    )]
    pub apply_timeout_ms: u64,

    /// How many snapshots to retain on disk.
    #[arg(
        long = "max-snapshots",
        env = "REPLIKV_MAX_SNAPSHOTS",
        value_name = "N",
        default_value_t = 3,
        value_parser = clap::value_parser!(u64).range(1..=100)
    )]
    pub max_snapshots: u64,
}

impl Config {
    pub fn engine_dir(&self) -> PathBuf {
        self.data_dir.join("engine")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("raft").join("snapshots")
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }
}
