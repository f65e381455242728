//! Florin Node - a Rust implementation of the Florin blockchain node.
//!
//! This is the main entry point for the florin-node binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// Florin blockchain node implementation in Rust.
#[derive(Parser, Debug)]
#[command(name = "florin-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "florin-node.toml")]
    config: PathBuf,

    /// Network to run on (main, test, regtest)
    #[arg(short, long, default_value = "main")]
    network: String,

    /// RPC bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// Enable the stake miner
    #[arg(long)]
    staking: Option<bool>,

    /// Disable minting even when staking is enabled
    #[arg(long)]
    nominting: bool,

    /// Base stake search timeout in milliseconds
    #[arg(long)]
    staketimio: Option<u64>,

    /// Maximum assembled block weight
    #[arg(long)]
    blockmaxweight: Option<u64>,

    /// Minimum package feerate for block inclusion, in FLR/kvB
    #[arg(long)]
    blockmintxfee: Option<String>,

    /// Block version override (regtest only)
    #[arg(long)]
    blockversion: Option<i32>,

    /// Log fee and txid for every transaction added to a block
    #[arg(long)]
    printpriority: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Florin Node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args)?;
    info!("Network: {}", config.network);
    info!("RPC: {}", config.rpc.bind_address);

    let node = Node::new(config).await?;

    let node_handle = node.clone();
    let shutdown_signal = async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        node_handle.shutdown().await;
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!("Node error: {}", e);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown complete");
        }
    }

    info!("Florin node stopped");
    Ok(())
}
