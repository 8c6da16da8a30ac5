pub mod types;
pub mod block;
pub mod state;
pub mod status;

pub use alloy_primitives::{B256, Bytes, U256};
pub use block::{Block, BlockBody, EMPTY_LIST_HASH, Header, Receipt, receipts_root};
pub use state::{AccountEntry, AccountRange};
pub use status::{ForkId, Status};
pub use types::{BlockNumber, ChainHead, short_hash};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload_block() -> Block {
        let body = BlockBody {
            transactions: vec![Bytes::from(vec![1u8, 2, 3])],
            ommers: vec![],
        };
        let receipts = vec![Receipt {
            success: true,
            cumulative_gas_used: 21_000,
            logs: vec![],
        }];
        let header = Header {
            number: 1,
            difficulty: U256::from(2u64),
            transactions_root: body.transactions_root(),
            ommers_hash: body.ommers_hash(),
            receipts_root: receipts_root(&receipts),
            ..Header::default()
        };
        Block::new(header, body, receipts)
    }

    #[test]
    fn empty_list_hash_matches_empty_payload() {
        let body = BlockBody::default();
        assert_eq!(body.transactions_root(), EMPTY_LIST_HASH);
        assert_eq!(body.ommers_hash(), EMPTY_LIST_HASH);
        assert_eq!(receipts_root(&Vec::new()), EMPTY_LIST_HASH);
    }

    #[test]
    fn genesis_has_empty_payload() {
        let genesis = Header::genesis(U256::from(1u64), 0, Bytes::new());
        assert!(genesis.has_empty_body());
        assert!(genesis.has_empty_receipts());
    }

    #[test]
    fn block_consistency_detects_foreign_body() {
        let block = payload_block();
        assert!(block.is_consistent());
        assert!(!block.header.has_empty_body());

        let mut tampered = block.clone();
        tampered.body.transactions.push(Bytes::from(vec![9u8]));
        assert!(!tampered.is_consistent());
    }

    #[test]
    fn header_hash_changes_with_contents() {
        let block = payload_block();
        let mut other = block.header.clone();
        other.timestamp += 1;
        assert_ne!(block.hash(), other.hash());
    }

    #[test]
    fn header_rlp_decodes_to_same_hash() {
        let header = payload_block().header;
        let encoded = alloy_rlp::encode(&header);
        let decoded = <Header as alloy_rlp::Decodable>::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn account_range_next_origin_increments() {
        let mut hash = B256::ZERO;
        hash.0[31] = 0xff;
        let range = AccountRange {
            accounts: vec![AccountEntry::new(hash, Bytes::new())],
            more: true,
        };
        let mut expected = B256::ZERO;
        expected.0[30] = 1;
        assert_eq!(range.next_origin(), Some(expected));

        let last = AccountRange {
            accounts: vec![AccountEntry::new(B256::repeat_byte(0xff), Bytes::new())],
            more: false,
        };
        assert_eq!(last.next_origin(), None);
    }
}
