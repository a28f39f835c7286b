use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use replikv::{config::Config, node::Node};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::parse();
    info!(node_id = config.node_id, data_dir = %config.data_dir.display(), "starting replikv");

    let node = Node::new(config);
    node.start().await?;

    shutdown_signal().await;
    node.stop().await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).compact().init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
