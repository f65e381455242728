//! The background staking loop.
//!
//! One task per staking wallet. Each iteration walks a readiness ladder
//! (shutdown, enable flag, wallet lock, peers, sync), then asks the
//! assembler for a proof-of-stake template, signs it and submits it.
//! All sleeps are interruptible through the context's cancellation
//! token.

use crate::{
    increment_extra_nonce, BlockAssembler, MiningContext, Options, DEFAULT_STAKETIMIO,
};
use florin_chain::{Block, ChainParams};
use florin_consensus::check_proof_of_stake;
use florin_mempool::Mempool;
use florin_state::ChainstateManager;
use florin_wallet::StakingWallet;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const WARN_LOCKED: &str = "Staking suspended due to locked wallet.";
pub const WARN_SYNCING: &str = "Staking suspended while synchronizing wallet.";
pub const WARN_DISABLED: &str = "Staking disabled by 'nominting' option.";
pub const WARN_BLOCK_CREATION: &str = "Staking suspended due to block creation failure.";

/// Verification progress below which the staker keeps waiting.
const MIN_VERIFICATION_PROGRESS: f64 = 0.996;

/// States of the staking loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StakerState {
    Disabled,
    Idle,
    WaitingWalletUnlock,
    WaitingNetwork,
    WaitingSync,
    Searching,
    Signing,
    Submitting,
    Cooldown,
}

/// External predicates one readiness step looks at.
#[derive(Clone, Copy, Debug)]
pub struct StakerPredicates {
    pub shutdown: bool,
    pub staking_enabled: bool,
    pub wallet_locked: bool,
    pub peer_count: usize,
    pub is_regtest: bool,
    pub initial_block_download: bool,
    pub verification_progress: f64,
}

/// Outcome of one readiness evaluation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReadinessStep {
    /// Leave the loop for good.
    Exit,
    /// Sleep and re-evaluate, publishing a warning meanwhile.
    Wait {
        state: StakerState,
        delay: Duration,
        warning: &'static str,
    },
    /// Ready to search for a kernel.
    Ready,
}

/// Pure transition function of the readiness ladder.
pub fn next_readiness_step(predicates: &StakerPredicates) -> ReadinessStep {
    if predicates.shutdown || !predicates.staking_enabled {
        return ReadinessStep::Exit;
    }
    if predicates.wallet_locked {
        return ReadinessStep::Wait {
            state: StakerState::WaitingWalletUnlock,
            delay: Duration::from_secs(2),
            warning: WARN_LOCKED,
        };
    }
    if predicates.peer_count == 0 && !predicates.is_regtest {
        return ReadinessStep::Wait {
            state: StakerState::WaitingNetwork,
            delay: Duration::from_secs(10),
            warning: WARN_SYNCING,
        };
    }
    if predicates.initial_block_download && !predicates.is_regtest {
        return ReadinessStep::Wait {
            state: StakerState::WaitingSync,
            delay: Duration::from_secs(10),
            warning: WARN_SYNCING,
        };
    }
    if predicates.verification_progress < MIN_VERIFICATION_PROGRESS && !predicates.is_regtest {
        return ReadinessStep::Wait {
            state: StakerState::WaitingSync,
            delay: Duration::from_secs(10),
            warning: WARN_SYNCING,
        };
    }
    ReadinessStep::Ready
}

/// Sleep unless interrupted; returns whether the wait completed.
pub async fn interruptible_sleep(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Kernel re-check, stale-tip detection, and submission of a found
/// proof-of-stake block.
pub fn process_block_found(
    block: &Block,
    chainstate: &ChainstateManager,
    params: &ChainParams,
) -> bool {
    let hash = block.hash();
    debug!(block = %hash, "Processing found stake block");

    let Some(prev) = chainstate.lookup_block_index(&block.header.prev_hash) else {
        error!(block = %hash, "Found block has unknown parent");
        return false;
    };

    let coinstake = &block.transactions[1];
    let kernel_time = if coinstake.time != 0 {
        coinstake.time as i64
    } else {
        block.header.time as i64
    };
    {
        let coins = chainstate.coins_tip();
        let lookup = |outpoint: &florin_chain::OutPoint| {
            coins.get(outpoint).map(|coin| florin_consensus::StakeCoin {
                value: coin.output.value,
                time: coin.time,
                height: coin.height,
            })
        };
        if let Err(err) = check_proof_of_stake(
            prev.as_ref(),
            coinstake,
            block.header.bits,
            kernel_time,
            lookup,
            params,
        ) {
            error!(block = %hash, %err, "Proof-of-stake checking failed");
            return false;
        }
    }

    if block.header.prev_hash != chainstate.best_hash() {
        error!(block = %hash, "Generated block is stale");
        return false;
    }

    if !chainstate.process_new_block(block, true) {
        error!(block = %hash, "Block not accepted");
        return false;
    }
    true
}

/// Staking configuration.
#[derive(Clone, Debug)]
pub struct StakerConfig {
    /// `-staking` flag.
    pub staking: bool,
    /// `-nominting` flag.
    pub nominting: bool,
    /// `-staketimio`: base search timeout in milliseconds.
    pub staketimio_ms: u64,
}

impl Default for StakerConfig {
    fn default() -> Self {
        Self {
            staking: crate::DEFAULT_STAKE,
            nominting: false,
            staketimio_ms: DEFAULT_STAKETIMIO,
        }
    }
}

/// The staking miner: owns the dependencies of the loop and its
/// lifecycle.
pub struct Staker {
    pub ctx: Arc<MiningContext>,
    pub chainstate: Arc<ChainstateManager>,
    pub mempool: Arc<Mempool>,
    pub wallet: Arc<StakingWallet>,
    pub peer_count: Arc<AtomicUsize>,
    pub options: Options,
    pub config: StakerConfig,
    pub shutdown: CancellationToken,
}

impl Staker {
    /// Spawn the staking task if it is not already running. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.ctx.staking_enabled() {
            return;
        }
        self.ctx.set_staking_enabled(true);

        let cancel = CancellationToken::new();
        *self.ctx.staker_cancel.lock() = cancel.clone();

        let staker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("Stake miner task started");
            staker.run(cancel).await;
            info!("Stake miner task stopped");
        });
        *self.ctx.staker_task.lock() = Some(handle);
    }

    /// Clear the enable flag, wake any sleep, and join the task.
    pub async fn interrupt(&self) {
        info!("Interrupting stake miner");
        self.ctx.set_staking_enabled(false);
        self.ctx.staker_cancel.lock().cancel();
        self.join().await;
    }

    /// Join the task without clearing the enable flag (shutdown path).
    pub async fn stop(&self) {
        info!("Stopping stake miner");
        self.join().await;
    }

    async fn join(&self) {
        let handle = self.ctx.staker_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut state = StakerState::Idle;

        if !self.config.staking || self.config.nominting {
            state = StakerState::Disabled;
            self.ctx.set_miner_warning(WARN_DISABLED);
            info!(?state, "Proof-of-stake miner disabled");
            return;
        }

        debug!(?state, "Stake miner entering its loop");
        let mut extra_nonce = 0u32;

        // Reserve a destination and size the search timeout from the
        // mature coin count, once at startup.
        let destination = match self.wallet.reserve_destination() {
            Ok(destination) => destination,
            Err(err) => {
                error!(%err, "Stake miner cannot reserve a destination");
                self.ctx.set_miner_warning(WARN_BLOCK_CREATION);
                return;
            }
        };
        let mature_coins = self
            .wallet
            .available_coins(self.chainstate.params().coinbase_maturity)
            .len();
        let pos_timeout = Duration::from_millis(
            self.config.staketimio_ms + 30 * (mature_coins as f64).sqrt() as u64,
        );
        info!(
            timeout_ms = pos_timeout.as_millis() as u64,
            utxos = mature_coins,
            "Set proof-of-stake timeout"
        );

        let params = self.chainstate.params().clone();
        let mut need_clear = false;

        while self.ctx.staking_enabled() {
            // Readiness ladder.
            loop {
                let predicates = StakerPredicates {
                    shutdown: self.shutdown.is_cancelled(),
                    staking_enabled: self.ctx.staking_enabled(),
                    wallet_locked: self.wallet.is_locked(),
                    peer_count: self.peer_count.load(Ordering::Relaxed),
                    is_regtest: params.mine_blocks_on_demand(),
                    initial_block_download: self.chainstate.is_initial_block_download(),
                    verification_progress: self.chainstate.verification_progress(),
                };
                match next_readiness_step(&predicates) {
                    ReadinessStep::Exit => return,
                    ReadinessStep::Ready => break,
                    ReadinessStep::Wait {
                        state: wait_state,
                        delay,
                        warning,
                    } => {
                        state = wait_state;
                        if self.ctx.miner_warning() != warning {
                            self.ctx.set_miner_warning(warning);
                        }
                        debug!(?state, "Staker waiting");
                        need_clear = true;
                        if !interruptible_sleep(&cancel, delay).await {
                            return;
                        }
                    }
                }
            }
            if need_clear {
                self.ctx.set_miner_warning("");
                need_clear = false;
            }

            // Build a candidate stake block.
            state = StakerState::Searching;
            debug!(?state, "Searching for a kernel");
            let prev = self.chainstate.tip();
            let mut pos_cancel = false;
            let template = {
                let mut assembler = BlockAssembler::new(
                    Arc::clone(&self.chainstate),
                    Arc::clone(&self.mempool),
                    Arc::clone(&self.ctx),
                    self.options.clone(),
                );
                assembler.create_new_block(
                    destination.script_pubkey(),
                    Some(self.wallet.as_ref()),
                    Some(&mut pos_cancel),
                    None,
                )
            };

            let mut template = match template {
                Ok(Some(template)) => template,
                Ok(None) if pos_cancel => {
                    // No kernel this round; retry after the timeout.
                    if !interruptible_sleep(&cancel, pos_timeout).await {
                        return;
                    }
                    continue;
                }
                Ok(None) | Err(_) => {
                    self.ctx.set_miner_warning(WARN_BLOCK_CREATION);
                    error!("Stake miner block creation failed; exiting");
                    let _ = interruptible_sleep(&cancel, Duration::from_secs(10)).await;
                    return;
                }
            };

            increment_extra_nonce(&self.ctx, &mut template.block, prev.as_ref(), &mut extra_nonce);

            if template.block.is_proof_of_stake() {
                state = StakerState::Signing;
                if !self.wallet.sign_block(&mut template.block) {
                    warn!("Failed to sign proof-of-stake block");
                    continue;
                }
                state = StakerState::Submitting;
                info!(?state, block = %template.block.hash(), "Proof-of-stake block found");
                if process_block_found(&template.block, &self.chainstate, &params) {
                    // Rest after a successful block.
                    state = StakerState::Cooldown;
                    debug!(?state, "Resting after accepted block");
                    let cooldown =
                        Duration::from_secs(60 + rand::thread_rng().gen_range(0..4));
                    if !interruptible_sleep(&cancel, cooldown).await {
                        return;
                    }
                }
            }

            if !interruptible_sleep(&cancel, pos_timeout).await {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_predicates() -> StakerPredicates {
        StakerPredicates {
            shutdown: false,
            staking_enabled: true,
            wallet_locked: false,
            peer_count: 3,
            is_regtest: false,
            initial_block_download: false,
            verification_progress: 1.0,
        }
    }

    #[test]
    fn test_ready_when_all_predicates_pass() {
        assert_eq!(next_readiness_step(&ready_predicates()), ReadinessStep::Ready);
    }

    #[test]
    fn test_shutdown_and_disable_exit() {
        let mut p = ready_predicates();
        p.shutdown = true;
        assert_eq!(next_readiness_step(&p), ReadinessStep::Exit);

        let mut p = ready_predicates();
        p.staking_enabled = false;
        assert_eq!(next_readiness_step(&p), ReadinessStep::Exit);
    }

    #[test]
    fn test_locked_wallet_waits_two_seconds() {
        let mut p = ready_predicates();
        p.wallet_locked = true;
        match next_readiness_step(&p) {
            ReadinessStep::Wait {
                state,
                delay,
                warning,
            } => {
                assert_eq!(state, StakerState::WaitingWalletUnlock);
                assert_eq!(delay, Duration::from_secs(2));
                assert_eq!(warning, WARN_LOCKED);
            }
            other => panic!("expected wait, got {other:?}"),
        }
    }

    #[test]
    fn test_no_peers_waits_unless_regtest() {
        let mut p = ready_predicates();
        p.peer_count = 0;
        assert!(matches!(
            next_readiness_step(&p),
            ReadinessStep::Wait {
                state: StakerState::WaitingNetwork,
                ..
            }
        ));

        p.is_regtest = true;
        assert_eq!(next_readiness_step(&p), ReadinessStep::Ready);
    }

    #[test]
    fn test_sync_gates() {
        let mut p = ready_predicates();
        p.initial_block_download = true;
        assert!(matches!(
            next_readiness_step(&p),
            ReadinessStep::Wait {
                state: StakerState::WaitingSync,
                delay,
                warning: WARN_SYNCING,
            } if delay == Duration::from_secs(10)
        ));

        let mut p = ready_predicates();
        p.verification_progress = 0.5;
        assert!(matches!(
            next_readiness_step(&p),
            ReadinessStep::Wait {
                state: StakerState::WaitingSync,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(!interruptible_sleep(&token, Duration::from_secs(60)).await);

        let token = CancellationToken::new();
        assert!(interruptible_sleep(&token, Duration::from_millis(1)).await);
    }
}
