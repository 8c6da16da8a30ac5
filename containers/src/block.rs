use alloy_primitives::{B256, Bytes, U256, b256, keccak256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::types::BlockNumber;

/// keccak256 of the RLP encoding of an empty list.
///
/// Used as the transactions, ommers and receipts root of blocks that carry no
/// payload, which lets the downloader skip fetching their bodies and receipts.
pub const EMPTY_LIST_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Maximum length of the header extra-data field.
pub const MAX_EXTRA_DATA_BYTES: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub parent_hash: B256,
    pub ommers_hash: B256,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub number: BlockNumber,
    pub difficulty: U256,
    pub timestamp: u64,
    pub extra_data: Bytes,
}

impl Header {
    /// Genesis header for a network. Carries no payload, so all payload roots are empty.
    pub fn genesis(difficulty: U256, timestamp: u64, extra_data: Bytes) -> Self {
        Self {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_LIST_HASH,
            state_root: B256::ZERO,
            transactions_root: EMPTY_LIST_HASH,
            receipts_root: EMPTY_LIST_HASH,
            number: 0,
            difficulty,
            timestamp,
            extra_data,
        }
    }

    pub fn hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    /// True if the header commits to an empty body (no transactions, no ommers).
    pub fn has_empty_body(&self) -> bool {
        self.transactions_root == EMPTY_LIST_HASH && self.ommers_hash == EMPTY_LIST_HASH
    }

    /// True if the header commits to an empty receipt list.
    pub fn has_empty_receipts(&self) -> bool {
        self.receipts_root == EMPTY_LIST_HASH
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<Bytes>,
    pub ommers: Vec<Header>,
}

impl BlockBody {
    pub fn transactions_root(&self) -> B256 {
        keccak256(alloy_rlp::encode(&self.transactions))
    }

    pub fn ommers_hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(&self.ommers))
    }

    /// Checks that this body is the one committed to by `header`.
    pub fn matches(&self, header: &Header) -> bool {
        self.transactions_root() == header.transactions_root
            && self.ommers_hash() == header.ommers_hash
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub success: bool,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Bytes>,
}

pub fn receipts_root(receipts: &Vec<Receipt>) -> B256 {
    keccak256(alloy_rlp::encode(receipts))
}

/// A block as handed to the chain for import: header plus the payload it commits to.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub body: BlockBody,
    pub receipts: Vec<Receipt>,
}

impl Block {
    pub fn new(header: Header, body: BlockBody, receipts: Vec<Receipt>) -> Self {
        Self {
            header,
            body,
            receipts,
        }
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Verifies the body and receipts against the roots in the header.
    pub fn is_consistent(&self) -> bool {
        self.body.matches(&self.header) && receipts_root(&self.receipts) == self.header.receipts_root
    }
}
