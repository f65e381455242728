//! The staking wallet.

use crate::{Destination, KeyStore, WalletError, WalletResult};
use florin_chain::{Amount, Block, OutPoint, Transaction, TxId, TxIn, TxOut};
use florin_consensus::check_kernel;
use florin_state::{ChainstateManager, Coin};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A coin owned by the wallet.
#[derive(Clone, Debug)]
pub struct OwnedCoin {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub time: u32,
    pub height: u32,
    pub destination: Destination,
}

/// The wallet a staking node runs: keys, coins, coinstakes, block
/// signatures.
pub struct StakingWallet {
    chainstate: Arc<ChainstateManager>,
    keystore: KeyStore,
    locked: AtomicBool,
    /// Coinstakes created but not yet seen in a connected block.
    pending_coinstakes: Mutex<Vec<TxId>>,
}

impl StakingWallet {
    pub fn new(chainstate: Arc<ChainstateManager>) -> Self {
        Self {
            chainstate,
            keystore: KeyStore::new(),
            locked: AtomicBool::new(false),
            pending_coinstakes: Mutex::new(Vec::new()),
        }
    }

    /// Create a wallet with `keys` pre-generated keypool entries.
    pub fn with_keys(chainstate: Arc<ChainstateManager>, keys: usize) -> Self {
        let wallet = Self::new(chainstate);
        wallet.keystore.top_up(keys);
        wallet
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
        info!("Wallet locked");
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        info!("Wallet unlocked");
    }

    /// Reserve a destination from the keypool.
    pub fn reserve_destination(&self) -> WalletResult<Destination> {
        self.keystore.reserve()
    }

    /// All coins owned by this wallet with at least `min_depth`
    /// confirmations.
    pub fn available_coins(&self, min_depth: u32) -> Vec<OwnedCoin> {
        let tip_height = self.chainstate.height();
        let coins = self.chainstate.coins_tip();
        let mut out = Vec::new();
        for (outpoint, coin) in coins.iter() {
            let Some(destination) = Destination::from_script(&coin.output.script_pubkey) else {
                continue;
            };
            if !self.keystore.owns(&destination) {
                continue;
            }
            let depth = tip_height.saturating_sub(coin.height) + 1;
            if depth < min_depth {
                continue;
            }
            out.push(OwnedCoin {
                outpoint: *outpoint,
                value: coin.output.value,
                time: coin.time,
                height: coin.height,
                destination,
            });
        }
        out
    }

    /// Total value of coins mature enough to stake.
    pub fn get_stake_weight(&self) -> u64 {
        let maturity = self.chainstate.params().coinbase_maturity;
        self.available_coins(maturity)
            .iter()
            .map(|coin| coin.value as u64)
            .sum()
    }

    /// Search for a coinstake kernel at the given (already masked)
    /// timestamp and build the coinstake transaction if one is found.
    ///
    /// `search_interval` extra timestamps are probed backwards on the
    /// mask granularity. `fees` are folded into the stake output.
    pub fn create_coinstake(
        &self,
        bits: u32,
        search_interval: i64,
        search_time: i64,
        fees: Amount,
    ) -> WalletResult<Option<Transaction>> {
        if self.is_locked() {
            return Err(WalletError::Locked);
        }

        let params = self.chainstate.params().clone();
        let prev = self.chainstate.tip();
        let maturity = params.coinbase_maturity;
        let candidates = self.available_coins(maturity);
        if candidates.is_empty() {
            return Ok(None);
        }

        let step = params.stake_timestamp_mask as i64 + 1;
        for offset in 0..search_interval.max(1) {
            let time = search_time - offset * step;
            if time <= 0 {
                break;
            }
            for coin in &candidates {
                let coins = self.chainstate.coins_tip();
                let lookup = |outpoint: &OutPoint| coins.get(outpoint).map(coin_to_stake);
                if check_kernel(prev.as_ref(), bits, time, &coin.outpoint, lookup, &params).is_err()
                {
                    continue;
                }
                drop(coins);

                debug!(kernel = %coin.outpoint.txid, vout = coin.outpoint.vout, time, "Kernel found");
                let tx = self.build_coinstake(coin, time as u32, fees, &params)?;
                self.pending_coinstakes.lock().push(tx.txid());
                return Ok(Some(tx));
            }
        }
        Ok(None)
    }

    fn build_coinstake(
        &self,
        coin: &OwnedCoin,
        time: u32,
        fees: Amount,
        params: &florin_chain::ChainParams,
    ) -> WalletResult<Transaction> {
        let mut input = TxIn::new(coin.outpoint);
        // The input signature binds the kernel outpoint and timestamp.
        let mut message = Vec::with_capacity(40);
        message.extend_from_slice(coin.outpoint.txid.as_bytes());
        message.extend_from_slice(&coin.outpoint.vout.to_le_bytes());
        message.extend_from_slice(&time.to_le_bytes());
        let signature = self.keystore.sign(&coin.destination, &message)?;
        input
            .script_sig
            .push_slice(&signature)
            .push_slice(&coin.destination.0);

        let stake_value = coin.value + params.stake_reward + fees;
        Ok(Transaction {
            version: 1,
            time,
            inputs: vec![input],
            outputs: vec![
                TxOut::default(),
                TxOut::new(stake_value, coin.destination.script_pubkey()),
            ],
            lock_time: 0,
        })
    }

    /// Sign a proof-of-stake block with the key that owns its kernel.
    pub fn sign_block(&self, block: &mut Block) -> bool {
        if !block.is_proof_of_stake() {
            return false;
        }
        let kernel_prevout = block.transactions[1].inputs[0].prevout;
        let destination = {
            let coins = self.chainstate.coins_tip();
            match coins
                .get(&kernel_prevout)
                .and_then(|coin| Destination::from_script(&coin.output.script_pubkey))
            {
                Some(dest) => dest,
                None => {
                    warn!(kernel = %kernel_prevout.txid, "Cannot sign block: kernel coin unknown");
                    return false;
                }
            }
        };

        match self.keystore.sign(&destination, block.hash().as_bytes()) {
            Ok(signature) => {
                block.signature = signature;
                true
            }
            Err(_) => false,
        }
    }

    /// Forget coinstakes that never made it into the chain.
    pub fn abandon_orphaned_coinstakes(&self) {
        let mut pending = self.pending_coinstakes.lock();
        let before = pending.len();
        pending.clear();
        if before > 0 {
            debug!(abandoned = before, "Abandoned orphaned coinstakes");
        }
    }
}

fn coin_to_stake(coin: &Coin) -> florin_consensus::StakeCoin {
    florin_consensus::StakeCoin {
        value: coin.output.value,
        time: coin.time,
        height: coin.height,
    }
}
