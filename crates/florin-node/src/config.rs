//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use florin_chain::{ChainParams, Network};
use florin_mining::{DEFAULT_BLOCK_MAX_WEIGHT, DEFAULT_STAKE, DEFAULT_STAKETIMIO};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network (main, test, regtest).
    pub network: String,
    /// Known peers; defaults come from the embedded seed table.
    #[serde(default)]
    pub known_peers: Vec<String>,
    /// RPC configuration.
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Block assembly configuration.
    #[serde(default)]
    pub mining: MiningConfig,
    /// Stake miner configuration.
    #[serde(default)]
    pub staking: StakingConfig,
}

/// RPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// RPC bind address.
    pub bind_address: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9777".to_string(),
        }
    }
}

/// Block assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Maximum assembled block weight; clamped by the assembler.
    #[serde(default = "default_block_max_weight")]
    pub blockmaxweight: u64,
    /// Minimum package feerate in FLR/kvB; unset means the built-in
    /// default.
    #[serde(default)]
    pub blockmintxfee: Option<String>,
    /// Block version override, honored on regtest only.
    #[serde(default)]
    pub blockversion: Option<i32>,
    /// Log fee and txid for every included transaction.
    #[serde(default)]
    pub printpriority: bool,
}

fn default_block_max_weight() -> u64 {
    DEFAULT_BLOCK_MAX_WEIGHT
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            blockmaxweight: DEFAULT_BLOCK_MAX_WEIGHT,
            blockmintxfee: None,
            blockversion: None,
            printpriority: false,
        }
    }
}

/// Stake miner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Run the stake miner.
    #[serde(default = "default_staking")]
    pub staking: bool,
    /// Hard-disable minting regardless of the staking flag.
    #[serde(default)]
    pub nominting: bool,
    /// Base stake search timeout in milliseconds.
    #[serde(default = "default_staketimio")]
    pub staketimio: u64,
}

fn default_staking() -> bool {
    DEFAULT_STAKE
}

fn default_staketimio() -> u64 {
    DEFAULT_STAKETIMIO
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            staking: DEFAULT_STAKE,
            nominting: false,
            staketimio: DEFAULT_STAKETIMIO,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(&args.network)?
        };

        config.network = args.network.clone();

        if let Some(ref rpc_bind) = args.rpc_bind {
            config.rpc.bind_address = rpc_bind.clone();
        }
        if let Some(staking) = args.staking {
            config.staking.staking = staking;
        }
        if args.nominting {
            config.staking.nominting = true;
        }
        if let Some(staketimio) = args.staketimio {
            config.staking.staketimio = staketimio;
        }
        if let Some(blockmaxweight) = args.blockmaxweight {
            config.mining.blockmaxweight = blockmaxweight;
        }
        if let Some(ref blockmintxfee) = args.blockmintxfee {
            config.mining.blockmintxfee = Some(blockmintxfee.clone());
        }
        if let Some(blockversion) = args.blockversion {
            config.mining.blockversion = Some(blockversion);
        }
        if args.printpriority {
            config.mining.printpriority = true;
        }

        Ok(config)
    }

    /// Create default config for a network, seeding known peers from
    /// the embedded seed table.
    pub fn default_for_network(network: &str) -> Result<Self> {
        let network_id =
            Network::from_str(network).map_err(|err| anyhow::anyhow!("{err}"))?;
        let params = ChainParams::new(network_id);
        let known_peers = params.fixed_seeds();

        Ok(Self {
            network: network.to_string(),
            known_peers,
            rpc: RpcConfig::default(),
            mining: MiningConfig::default(),
            staking: StakingConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_main_config_has_seed_peers() {
        let config = NodeConfig::default_for_network("main").unwrap();
        assert!(!config.known_peers.is_empty());
        assert!(config.staking.staking);
    }

    #[test]
    fn test_regtest_config_has_no_seeds() {
        let config = NodeConfig::default_for_network("regtest").unwrap();
        assert!(config.known_peers.is_empty());
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(NodeConfig::default_for_network("moonnet").is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = NodeConfig::default_for_network("test").unwrap();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network, "test");
        assert_eq!(parsed.staking.staketimio, config.staking.staketimio);
    }
}
