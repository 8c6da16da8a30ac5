use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type BlockNumber = u64;

/// Read-only snapshot of the local (or a remote) chain tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHead {
    pub hash: B256,
    pub number: BlockNumber,
    pub total_difficulty: U256,
}

impl ChainHead {
    pub fn new(hash: B256, number: BlockNumber, total_difficulty: U256) -> Self {
        Self {
            hash,
            number,
            total_difficulty,
        }
    }

    /// Returns true if `other` carries strictly more cumulative difficulty.
    pub fn is_behind(&self, other: U256) -> bool {
        other > self.total_difficulty
    }
}

impl fmt::Display for ChainHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} (td {})",
            self.number,
            short_hash(&self.hash),
            self.total_difficulty
        )
    }
}

/// Abbreviated hex rendering used in log lines.
pub fn short_hash(hash: &B256) -> String {
    let bytes = hash.as_slice();
    format!("{}..{}", hex::encode(&bytes[..4]), hex::encode(&bytes[28..]))
}
