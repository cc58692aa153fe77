// NetworkDB - gossip-based, eventually-consistent network database for
// container networking control planes.
//
// This binary is a thin demo/ops wrapper around `networkdb-core`: it loads
// configuration, starts a node, optionally joins a set of seed peers, and
// runs until an interrupt or termination signal tells it to shut down.

use anyhow::Result;
use clap::Parser;
use networkdb_core::{NetworkDb, NetworkDbConfig};
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info};

/// Run a NetworkDB node.
#[derive(Parser, Debug)]
#[command(name = "networkdb", version, about)]
struct Cli {
    /// Seed peer addresses to push/pull with on startup (repeatable).
    #[arg(long = "join", value_name = "ADDR")]
    join: Vec<SocketAddr>,

    /// Path to a JSON config file. Falls back to `config.json` in the
    /// current directory (written with defaults if it doesn't exist yet).
    #[arg(long = "config")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("networkdb=info".parse()?))
        .json()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => serde_json::from_str(&tokio::fs::read_to_string(path).await?)?,
        None => NetworkDbConfig::load().await?,
    };

    info!("starting networkdb node");
    let db = match NetworkDb::new(config).await {
        Ok(db) => db,
        Err(err) => {
            error!(%err, "failed to start networkdb node");
            return Err(err.into());
        }
    };
    info!(node = %db.node().id, addr = %db.node().address, "networkdb node started");

    if !cli.join.is_empty() {
        db.join(cli.join).await?;
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping networkdb node"),
        Err(err) => error!(%err, "unable to listen for shutdown signal"),
    }

    db.close().await;
    info!("networkdb node stopped");
    Ok(())
}
