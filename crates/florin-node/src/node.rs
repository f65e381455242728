//! Node wiring and lifecycle.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use florin_chain::{parse_money, ChainParams, FeeRate, Network};
use florin_mempool::Mempool;
use florin_mining::{MiningContext, Options, Staker, StakerConfig, DEFAULT_BLOCK_MIN_TX_FEE};
use florin_rpc::AppState;
use florin_state::ChainstateManager;
use florin_wallet::StakingWallet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Number of keypool entries a fresh wallet pre-generates.
const KEYPOOL_SIZE: usize = 64;

/// The assembled node.
#[derive(Clone)]
pub struct Node {
    config: NodeConfig,
    chainstate: Arc<ChainstateManager>,
    staker: Arc<Staker>,
    rpc_running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    app_state: AppState,
}

impl Node {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let network = Network::from_str(&config.network)
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        let params = ChainParams::new(network);

        let chainstate = Arc::new(ChainstateManager::new(params.clone()));
        let mempool = Arc::new(Mempool::new());

        // Confirmed transactions leave the pool as blocks connect.
        {
            let mempool = Arc::clone(&mempool);
            chainstate.on_block_connected(move |block| mempool.remove_for_block(block));
        }

        let wallet = Arc::new(StakingWallet::with_keys(
            Arc::clone(&chainstate),
            KEYPOOL_SIZE,
        ));
        let mining_ctx = Arc::new(MiningContext::new());

        let min_fee_rate = match &config.mining.blockmintxfee {
            Some(text) => match parse_money(text) {
                Ok(amount) => FeeRate::from_per_kvb(amount),
                Err(err) => {
                    warn!(%err, "Invalid blockmintxfee, using default");
                    FeeRate::from_per_kvb(DEFAULT_BLOCK_MIN_TX_FEE)
                }
            },
            None => FeeRate::from_per_kvb(DEFAULT_BLOCK_MIN_TX_FEE),
        };
        let assembler_options = Options {
            min_fee_rate,
            max_weight: config.mining.blockmaxweight,
            block_version: config.mining.blockversion,
            print_priority: config.mining.printpriority,
        };

        let peer_count = Arc::new(AtomicUsize::new(0));
        let rpc_running = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();

        let staker = Arc::new(Staker {
            ctx: Arc::clone(&mining_ctx),
            chainstate: Arc::clone(&chainstate),
            mempool: Arc::clone(&mempool),
            wallet: Arc::clone(&wallet),
            peer_count: Arc::clone(&peer_count),
            options: assembler_options.clone(),
            config: StakerConfig {
                staking: config.staking.staking,
                nominting: config.staking.nominting,
                staketimio_ms: config.staking.staketimio,
            },
            shutdown: shutdown.clone(),
        });

        let app_state = AppState {
            chainstate: Arc::clone(&chainstate),
            mempool,
            wallet: Some(wallet),
            staker: Some(Arc::clone(&staker)),
            mining_ctx,
            assembler_options,
            peer_count,
            rpc_running: Arc::clone(&rpc_running),
        };

        if !config.known_peers.is_empty() {
            info!(peers = config.known_peers.len(), "Seeded peer list loaded");
        }

        Ok(Self {
            config,
            chainstate,
            staker,
            rpc_running,
            shutdown,
            app_state,
        })
    }

    /// Run the RPC server and the stake miner until shutdown.
    pub async fn run(&self) -> Result<()> {
        if self.config.staking.staking && !self.config.staking.nominting {
            self.staker.start();
        } else {
            info!("Stake miner not started (staking disabled or nominting set)");
        }

        info!(height = self.chainstate.height(), "Node running");
        florin_rpc::serve(&self.config.rpc.bind_address, self.app_state.clone())
            .await
            .context("RPC server failed")
    }

    /// Graceful shutdown: stop accepting long-polls, interrupt and join
    /// the stake miner.
    pub async fn shutdown(&self) {
        self.rpc_running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.staker.interrupt().await;
        self.staker.stop().await;
    }
}
