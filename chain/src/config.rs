use alloy_primitives::{Bytes, U256};
use containers::Header;

use crate::fork_id::ForkFilter;

pub const DEVNET_NETWORK_ID: u64 = 1337;
pub const GENESIS_DIFFICULTY: u64 = 131_072;
pub const BLOCK_DIFFICULTY: u64 = 131_072;
pub const BLOCK_PERIOD_SECS: u64 = 13;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const GENESIS_EXTRA_DATA: &[u8] = b"chainsync devnet";

/// Protocol-upgrade heights of the devnet. The first one is low enough that a
/// freshly generated test chain crosses it, so peers on either side of it must
/// still accept each other's fork id.
pub const DEVNET_FORK_BLOCKS: [u64; 2] = [512, 1_150_000];

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub network_id: u64,
    pub genesis: Header,
    pub fork_blocks: Vec<u64>,
    pub block_difficulty: U256,
    pub block_period_secs: u64,
}

impl ChainConfig {
    pub fn devnet() -> Self {
        Self {
            network_id: DEVNET_NETWORK_ID,
            genesis: Header::genesis(
                U256::from(GENESIS_DIFFICULTY),
                GENESIS_TIMESTAMP,
                Bytes::from_static(GENESIS_EXTRA_DATA),
            ),
            fork_blocks: DEVNET_FORK_BLOCKS.to_vec(),
            block_difficulty: U256::from(BLOCK_DIFFICULTY),
            block_period_secs: BLOCK_PERIOD_SECS,
        }
    }

    pub fn with_network_id(mut self, network_id: u64) -> Self {
        self.network_id = network_id;
        self
    }

    pub fn fork_filter(&self) -> ForkFilter {
        ForkFilter::new(&self.genesis.hash(), &self.fork_blocks)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::devnet()
    }
}
