use alloy_primitives::{B256, FixedBytes, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact descriptor of the protocol upgrades a node knows about (EIP-2124).
///
/// `hash` is the CRC32 checksum of the genesis hash and every fork block already
/// passed, `next` is the block number of the next scheduled fork (0 if none).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct ForkId {
    pub hash: FixedBytes<4>,
    pub next: u64,
}

impl ForkId {
    pub fn new(hash: [u8; 4], next: u64) -> Self {
        Self {
            hash: FixedBytes(hash),
            next,
        }
    }
}

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", hex::encode(self.hash.as_slice()), self.next)
    }
}

/// Chain status exchanged once by both sides of an `eth` connection.
#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub protocol_version: u32,
    pub network_id: u64,
    pub total_difficulty: U256,
    pub head: B256,
    pub genesis: B256,
    pub fork_id: ForkId,
}
