use alloy_primitives::{B256, Bytes};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// One flat state-snapshot entry: account hash and its RLP-encoded account data.
#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct AccountEntry {
    pub hash: B256,
    pub data: Bytes,
}

impl AccountEntry {
    pub fn new(hash: B256, data: Bytes) -> Self {
        Self { hash, data }
    }
}

/// A contiguous, hash-ordered slice of a state snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct AccountRange {
    pub accounts: Vec<AccountEntry>,
    /// Set when entries past the last returned hash exist.
    pub more: bool,
}

impl AccountRange {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Hash to continue from when requesting the next range.
    pub fn next_origin(&self) -> Option<B256> {
        let last = self.accounts.last()?;
        let mut next = last.hash;
        for byte in next.0.iter_mut().rev() {
            let (value, overflow) = byte.overflowing_add(1);
            *byte = value;
            if !overflow {
                return Some(next);
            }
        }
        None
    }
}
