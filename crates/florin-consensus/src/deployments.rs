//! Soft-fork deployment state.
//!
//! Deployments activate at fixed heights on this chain; the version-bits
//! top mask is still applied to assembled block versions so external
//! miners see a well-formed version field.

use crate::HeaderView;
use florin_chain::ChainParams;

/// Version bits top mask for assembled blocks.
const VERSIONBITS_TOP_BITS: i32 = 0x2000_0000;

/// Known soft-fork deployments.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Deployment {
    Segwit,
}

impl Deployment {
    pub fn name(&self) -> &'static str {
        match self {
            Deployment::Segwit => "segwit",
        }
    }
}

/// Whether a deployment is active for the block following `prev`.
pub fn deployment_active_after<H: HeaderView>(
    prev: Option<&H>,
    params: &ChainParams,
    deployment: Deployment,
) -> bool {
    let next_height = prev.map(|p| p.height() + 1).unwrap_or(0);
    match deployment {
        Deployment::Segwit => next_height >= params.segwit_height,
    }
}

/// Compute the version for a newly assembled block.
pub fn compute_block_version<H: HeaderView>(_prev: Option<&H>, _params: &ChainParams) -> i32 {
    VERSIONBITS_TOP_BITS
}

#[cfg(test)]
mod tests {
    use super::*;
    use florin_chain::Network;

    struct FakeHeader(u32);

    impl HeaderView for FakeHeader {
        fn height(&self) -> u32 {
            self.0
        }
        fn time(&self) -> i64 {
            0
        }
        fn bits(&self) -> u32 {
            0
        }
        fn hash(&self) -> florin_chain::BlockHash {
            florin_chain::BlockHash::zero()
        }
        fn is_proof_of_stake(&self) -> bool {
            false
        }
        fn prev(&self) -> Option<&Self> {
            None
        }
    }

    #[test]
    fn test_segwit_active_from_configured_height() {
        let params = ChainParams::new(Network::Main);
        assert!(deployment_active_after(
            Some(&FakeHeader(0)),
            &params,
            Deployment::Segwit
        ));
        assert!(deployment_active_after::<FakeHeader>(
            None,
            &params,
            Deployment::Segwit
        ));
    }

    #[test]
    fn test_block_version_has_top_bits() {
        let params = ChainParams::new(Network::Main);
        let version = compute_block_version(Some(&FakeHeader(10)), &params);
        assert_eq!(version & VERSIONBITS_TOP_BITS, VERSIONBITS_TOP_BITS);
    }
}
