/// Deterministic chain generation for devnets and tests.
use alloy_primitives::{B256, Bytes, keccak256};
use containers::{AccountEntry, Block, BlockBody, Header, Receipt, receipts_root};

use crate::config::ChainConfig;

/// Every n-th block is generated without payload.
const EMPTY_BLOCK_INTERVAL: u64 = 4;

/// Builds `count` blocks on top of `parent`.
pub fn generate_blocks(config: &ChainConfig, parent: &Header, count: u64) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count as usize);
    let mut parent = parent.clone();

    for _ in 0..count {
        let number = parent.number + 1;
        let (body, receipts) = if number % EMPTY_BLOCK_INTERVAL == 0 {
            (BlockBody::default(), Vec::new())
        } else {
            payload_for(number)
        };

        let header = Header {
            parent_hash: parent.hash(),
            ommers_hash: body.ommers_hash(),
            state_root: state_root_at(number),
            transactions_root: body.transactions_root(),
            receipts_root: receipts_root(&receipts),
            number,
            difficulty: config.block_difficulty,
            timestamp: parent.timestamp + config.block_period_secs,
            extra_data: Bytes::new(),
        };

        parent = header.clone();
        blocks.push(Block::new(header, body, receipts));
    }

    blocks
}

fn payload_for(number: u64) -> (BlockBody, Vec<Receipt>) {
    let transactions = vec![
        Bytes::from([b"transfer".as_slice(), &number.to_be_bytes()].concat()),
        Bytes::from([b"call".as_slice(), &number.to_be_bytes()].concat()),
    ];
    let receipts = vec![
        Receipt {
            success: true,
            cumulative_gas_used: 21_000,
            logs: vec![],
        },
        Receipt {
            success: number % 3 != 0,
            cumulative_gas_used: 74_000,
            logs: vec![Bytes::from(number.to_be_bytes().to_vec())],
        },
    ];
    (
        BlockBody {
            transactions,
            ommers: vec![],
        },
        receipts,
    )
}

/// State root recorded in generated headers.
pub fn state_root_at(number: u64) -> B256 {
    keccak256([b"state".as_slice(), &number.to_be_bytes()].concat())
}

/// Flat snapshot with one account per generated block.
pub fn generate_accounts(count: u64) -> Vec<AccountEntry> {
    (0..count)
        .map(|index| {
            AccountEntry::new(
                keccak256(index.to_be_bytes()),
                Bytes::from(alloy_rlp::encode(index * 1_000_000_000)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_blocks_are_consistent_and_linked() {
        let config = ChainConfig::devnet();
        let blocks = generate_blocks(&config, &config.genesis, 9);

        assert_eq!(blocks.len(), 9);
        assert_eq!(blocks[0].header.parent_hash, config.genesis.hash());
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].header.parent_hash, pair[0].hash());
        }
        assert!(blocks.iter().all(Block::is_consistent));
        assert!(blocks[3].header.has_empty_body());
        assert!(!blocks[2].header.has_empty_body());
    }

    #[test]
    fn generation_is_deterministic() {
        let config = ChainConfig::devnet();
        let a = generate_blocks(&config, &config.genesis, 5);
        let b = generate_blocks(&config, &config.genesis, 5);
        assert_eq!(a, b);
    }
}
