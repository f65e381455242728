//! Shared test rig: a regtest node with a funded wallet.

use florin_chain::{
    Amount, Block, BlockHash, ChainParams, Network, OutPoint, Script, Transaction, TxIn, TxOut,
};
use florin_consensus::check_proof_of_work;
use florin_mempool::Mempool;
use florin_mining::{BlockAssembler, MiningContext, Options, Staker, StakerConfig};
use florin_rpc::AppState;
use florin_state::ChainstateManager;
use florin_wallet::{Destination, StakingWallet};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Serialized overhead of a witness-free one-input one-output
/// transaction; the output script pads the rest of a target vsize.
const TX_OVERHEAD: u64 = 77;

/// A wired-up regtest node for tests.
pub struct TestNode {
    pub params: ChainParams,
    pub chainstate: Arc<ChainstateManager>,
    pub mempool: Arc<Mempool>,
    pub wallet: Arc<StakingWallet>,
    pub ctx: Arc<MiningContext>,
    pub options: Options,
}

impl TestNode {
    pub fn regtest() -> Self {
        let params = ChainParams::new(Network::Regtest);
        let chainstate = Arc::new(ChainstateManager::new(params.clone()));
        let mempool = Arc::new(Mempool::new());
        {
            let mempool = Arc::clone(&mempool);
            chainstate.on_block_connected(move |block| mempool.remove_for_block(block));
        }
        let wallet = Arc::new(StakingWallet::with_keys(Arc::clone(&chainstate), 32));

        Self {
            params,
            chainstate,
            mempool,
            wallet,
            ctx: Arc::new(MiningContext::new()),
            options: Options::default(),
        }
    }

    pub fn assembler(&self) -> BlockAssembler {
        self.assembler_with(self.options.clone())
    }

    pub fn assembler_with(&self, options: Options) -> BlockAssembler {
        BlockAssembler::new(
            Arc::clone(&self.chainstate),
            Arc::clone(&self.mempool),
            Arc::clone(&self.ctx),
            options,
        )
    }

    /// Assemble, grind and connect one proof-of-work block paying
    /// `script`. Returns the coinbase outpoint.
    pub fn mine_pow_block_to(&self, script: Script) -> OutPoint {
        let template = self
            .assembler()
            .create_new_block(script, None, None, None)
            .expect("assembly")
            .expect("PoW template");
        let mut block = template.block;
        self.grind(&mut block);
        assert!(self.chainstate.process_new_block(&block, true));
        OutPoint::new(block.transactions[0].txid(), 0)
    }

    /// Mine `count` blocks to the wallet's first destinations and
    /// return the coinbase outpoints.
    pub fn mine_blocks_to_wallet(&self, count: usize) -> Vec<OutPoint> {
        let destination = self.wallet_destination();
        (0..count)
            .map(|_| self.mine_pow_block_to(destination.script_pubkey()))
            .collect()
    }

    /// Fund the wallet with mature coins: mines maturity + `extra`
    /// blocks and returns the outpoints that are mature afterwards.
    pub fn fund_wallet_mature(&self, extra: usize) -> Vec<OutPoint> {
        let maturity = self.params.coinbase_maturity as usize;
        let outpoints = self.mine_blocks_to_wallet(maturity + extra);
        outpoints[..=extra].to_vec()
    }

    pub fn wallet_destination(&self) -> Destination {
        self.wallet
            .reserve_destination()
            .expect("keypool not empty")
    }

    fn grind(&self, block: &mut Block) {
        while !check_proof_of_work(&block.hash(), block.header.bits, &self.params) {
            block.header.nonce += 1;
        }
    }

    /// Build a spend of `outpoint` padded to exactly `target_vsize`
    /// virtual bytes, and admit it to the mempool with the given fee.
    pub fn add_spend(
        &self,
        outpoint: OutPoint,
        target_vsize: u64,
        fee: Amount,
    ) -> Arc<Transaction> {
        let tx = make_padded_spend(outpoint, target_vsize, fee);
        self.mempool
            .add(Arc::clone(&tx), fee, tx.sigop_cost())
            .expect("mempool add");
        tx
    }

    /// An `AppState` for exercising the RPC dispatch layer.
    pub fn app_state(&self) -> AppState {
        let staker = Arc::new(Staker {
            ctx: Arc::clone(&self.ctx),
            chainstate: Arc::clone(&self.chainstate),
            mempool: Arc::clone(&self.mempool),
            wallet: Arc::clone(&self.wallet),
            peer_count: Arc::new(AtomicUsize::new(0)),
            options: self.options.clone(),
            config: StakerConfig {
                staking: true,
                nominting: false,
                staketimio_ms: 10,
            },
            shutdown: CancellationToken::new(),
        });
        AppState {
            chainstate: Arc::clone(&self.chainstate),
            mempool: Arc::clone(&self.mempool),
            wallet: Some(Arc::clone(&self.wallet)),
            staker: Some(staker),
            mining_ctx: Arc::clone(&self.ctx),
            assembler_options: self.options.clone(),
            peer_count: Arc::new(AtomicUsize::new(0)),
            rpc_running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn best_hash(&self) -> BlockHash {
        self.chainstate.best_hash()
    }
}

/// A one-input transaction padded to exactly `target_vsize` virtual
/// bytes. The output value is symbolic; mempool fees are supplied at
/// admission.
pub fn make_padded_spend(outpoint: OutPoint, target_vsize: u64, fee: Amount) -> Arc<Transaction> {
    assert!(target_vsize > TX_OVERHEAD);
    let script_len = (target_vsize - TX_OVERHEAD) as usize;
    let tx = Transaction {
        version: 1,
        time: 1,
        inputs: vec![TxIn::new(outpoint)],
        outputs: vec![TxOut::new(
            (50 * florin_chain::COIN - fee).max(1),
            Script::from_bytes(vec![florin_chain::OP_TRUE; script_len]),
        )],
        lock_time: 0,
    };
    assert_eq!(tx.vsize(), target_vsize, "padding arithmetic drifted");
    Arc::new(tx)
}
