//! Chain parameters.

use crate::{
    decode_seeds, Amount, Block, OutPoint, Script, Transaction, TxIn, TxOut, COIN,
    CHAINPARAMS_SEED_MAIN, CHAINPARAMS_SEED_TEST, OP_TRUE,
};
use serde::{Deserialize, Serialize};

/// Network selector.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Main,
    Test,
    Regtest,
}

impl Network {
    pub fn id(&self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Regtest => "regtest",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" | "mainnet" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Consensus and policy parameters for one network.
#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Target block spacing in seconds.
    pub target_spacing: i64,
    /// Retarget window in seconds.
    pub target_timespan: i64,
    /// Low bits masked off coinstake timestamps; kernels are searched on
    /// this granularity.
    pub stake_timestamp_mask: u32,
    /// Depth before a coinbase or coinstake output can be spent or staked.
    pub coinbase_maturity: u32,
    /// Height of the last block that may be proof-of-work.
    pub last_pow_block: u32,
    /// Compact proof-of-work limit.
    pub pow_limit_bits: u32,
    /// Compact proof-of-stake limit.
    pub pos_limit_bits: u32,
    /// Height at which the segwit deployment activates.
    pub segwit_height: u32,
    /// Initial proof-of-work block subsidy.
    pub base_subsidy: Amount,
    /// Blocks between subsidy halvings.
    pub halving_interval: u32,
    /// Fixed proof-of-stake reward.
    pub stake_reward: Amount,
    /// Static relay fee per kvB, reported by `estimatefee`.
    pub tx_fee_per_kvb: Amount,
    /// Whether low-difficulty blocks are allowed after spacing gaps.
    pub allow_min_difficulty_blocks: bool,
    /// Default P2P port; the embedded seeds listen on it.
    pub default_port: u16,
    /// Fixed seed table; opaque to the mining core.
    seed_data: &'static [u8],
}

impl ChainParams {
    pub fn new(network: Network) -> Self {
        match network {
            Network::Main => Self {
                network,
                target_spacing: 64,
                target_timespan: 16 * 60,
                stake_timestamp_mask: 0x0f,
                coinbase_maturity: 500,
                last_pow_block: 10_000,
                pow_limit_bits: 0x1e0f_ffff,
                pos_limit_bits: 0x1e00_ffff,
                segwit_height: 0,
                base_subsidy: 50 * COIN,
                halving_interval: 210_000,
                stake_reward: 2 * COIN,
                tx_fee_per_kvb: 10_000,
                allow_min_difficulty_blocks: false,
                default_port: 9779,
                seed_data: CHAINPARAMS_SEED_MAIN,
            },
            Network::Test => Self {
                network,
                coinbase_maturity: 60,
                last_pow_block: 1_000,
                allow_min_difficulty_blocks: true,
                default_port: 19779,
                seed_data: CHAINPARAMS_SEED_TEST,
                ..Self::new(Network::Main)
            },
            Network::Regtest => Self {
                network,
                target_spacing: 16,
                target_timespan: 16 * 16,
                stake_timestamp_mask: 0x03,
                coinbase_maturity: 8,
                last_pow_block: u32::MAX,
                pow_limit_bits: 0x207f_ffff,
                pos_limit_bits: 0x207f_ffff,
                segwit_height: 0,
                base_subsidy: 50 * COIN,
                halving_interval: 150,
                stake_reward: 2 * COIN,
                tx_fee_per_kvb: 1_000,
                allow_min_difficulty_blocks: true,
                default_port: 19444,
                seed_data: &[],
            },
        }
    }

    /// Test chains relax connectivity and sync requirements.
    pub fn is_test_chain(&self) -> bool {
        !matches!(self.network, Network::Main)
    }

    /// Regtest mines blocks on demand and honors `-blockversion`.
    pub fn mine_blocks_on_demand(&self) -> bool {
        matches!(self.network, Network::Regtest)
    }

    /// Blocks between difficulty adjustments, as a window length for the
    /// network hash rate estimate.
    pub fn difficulty_adjustment_interval(&self) -> u32 {
        (self.target_timespan / self.target_spacing).max(1) as u32
    }

    /// Decoded fixed seed addresses for this network, as `host:port`.
    pub fn fixed_seeds(&self) -> Vec<String> {
        decode_seeds(self.seed_data, self.default_port)
    }

    /// The deterministic genesis block for this network.
    pub fn genesis_block(&self) -> Block {
        let mut input = TxIn::new(OutPoint::null());
        input
            .script_sig
            .push_int(0)
            .push_slice(b"florin genesis 2022-03-14");
        let mut script_pubkey = Script::new();
        script_pubkey.push_opcode(OP_TRUE);

        let coinbase = Transaction {
            version: 1,
            time: self.genesis_time(),
            inputs: vec![input],
            outputs: vec![TxOut::new(self.base_subsidy, script_pubkey)],
            lock_time: 0,
        };

        let mut block = Block {
            transactions: vec![coinbase],
            ..Default::default()
        };
        block.header.time = self.genesis_time();
        block.header.bits = self.pow_limit_bits;
        block.header.merkle_root = block.merkle_root();
        block
    }

    fn genesis_time(&self) -> u32 {
        match self.network {
            Network::Main => 1_647_216_000,
            Network::Test => 1_647_302_400,
            Network::Regtest => 1_647_302_400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_deterministic() {
        let params = ChainParams::new(Network::Main);
        assert_eq!(
            params.genesis_block().hash(),
            params.genesis_block().hash()
        );
    }

    #[test]
    fn test_genesis_differs_per_network() {
        let main = ChainParams::new(Network::Main).genesis_block();
        let test = ChainParams::new(Network::Test).genesis_block();
        assert_ne!(main.hash(), test.hash());
    }

    #[test]
    fn test_regtest_is_on_demand() {
        assert!(ChainParams::new(Network::Regtest).mine_blocks_on_demand());
        assert!(!ChainParams::new(Network::Main).mine_blocks_on_demand());
    }

    #[test]
    fn test_main_has_seeds() {
        assert!(!ChainParams::new(Network::Main).fixed_seeds().is_empty());
        assert!(ChainParams::new(Network::Regtest).fixed_seeds().is_empty());
    }
}
