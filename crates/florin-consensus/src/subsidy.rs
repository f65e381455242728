//! Block subsidy schedule.

use florin_chain::{Amount, ChainParams};

/// Proof-of-work block subsidy at a given height.
///
/// Halves on the configured interval; proof-of-stake blocks pay the
/// fixed stake reward through the coinstake instead.
pub fn get_block_subsidy(height: u32, params: &ChainParams) -> Amount {
    let halvings = height / params.halving_interval;
    if halvings >= 64 {
        return 0;
    }
    params.base_subsidy >> halvings
}

#[cfg(test)]
mod tests {
    use super::*;
    use florin_chain::{Network, COIN};

    #[test]
    fn test_initial_subsidy() {
        let params = ChainParams::new(Network::Main);
        assert_eq!(get_block_subsidy(0, &params), 50 * COIN);
        assert_eq!(get_block_subsidy(1, &params), 50 * COIN);
    }

    #[test]
    fn test_halving() {
        let params = ChainParams::new(Network::Main);
        let first = get_block_subsidy(params.halving_interval - 1, &params);
        let second = get_block_subsidy(params.halving_interval, &params);
        assert_eq!(second * 2, first);
    }

    #[test]
    fn test_subsidy_exhausts() {
        let params = ChainParams::new(Network::Regtest);
        assert_eq!(get_block_subsidy(64 * params.halving_interval, &params), 0);
    }
}
