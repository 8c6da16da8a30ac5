use containers::{Header, block::MAX_EXTRA_DATA_BYTES};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("header #{number} does not link to its parent")]
    ParentMismatch { number: u64 },
    #[error("header number {got}, expected {expected}")]
    NumberMismatch { expected: u64, got: u64 },
    #[error("header #{number} timestamp {timestamp} not after parent timestamp {parent_timestamp}")]
    Timestamp {
        number: u64,
        timestamp: u64,
        parent_timestamp: u64,
    },
    #[error("header #{number} has zero difficulty")]
    ZeroDifficulty { number: u64 },
    #[error("header #{number} extra data too long: {len} bytes")]
    ExtraData { number: u64, len: usize },
}

/// Consensus collaborator: structural header checks applied before a header is
/// accepted into a batch destined for body/receipt fetch.
pub trait HeaderValidator: Send + Sync {
    fn validate_header(&self, header: &Header, parent: &Header) -> Result<(), ValidationError>;
}

/// Chain linkage checks only; seal and difficulty rules belong to the consensus engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicValidator;

impl HeaderValidator for BasicValidator {
    fn validate_header(&self, header: &Header, parent: &Header) -> Result<(), ValidationError> {
        let number = header.number;

        if number != parent.number + 1 {
            return Err(ValidationError::NumberMismatch {
                expected: parent.number + 1,
                got: number,
            });
        }
        if header.parent_hash != parent.hash() {
            return Err(ValidationError::ParentMismatch { number });
        }
        if header.timestamp <= parent.timestamp {
            return Err(ValidationError::Timestamp {
                number,
                timestamp: header.timestamp,
                parent_timestamp: parent.timestamp,
            });
        }
        if header.difficulty.is_zero() {
            return Err(ValidationError::ZeroDifficulty { number });
        }
        if header.extra_data.len() > MAX_EXTRA_DATA_BYTES {
            return Err(ValidationError::ExtraData {
                number,
                len: header.extra_data.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChainConfig, generator::generate_blocks};
    use alloy_primitives::{Bytes, U256};

    #[test]
    fn generated_chain_is_valid() {
        let config = ChainConfig::devnet();
        let blocks = generate_blocks(&config, &config.genesis, 8);
        let mut parent = config.genesis.clone();
        for block in blocks {
            BasicValidator.validate_header(&block.header, &parent).unwrap();
            parent = block.header;
        }
    }

    #[test]
    fn rejects_broken_linkage() {
        let config = ChainConfig::devnet();
        let blocks = generate_blocks(&config, &config.genesis, 2);

        let err = BasicValidator
            .validate_header(&blocks[1].header, &config.genesis)
            .unwrap_err();
        assert_eq!(err, ValidationError::NumberMismatch { expected: 1, got: 2 });

        let mut forged = blocks[0].header.clone();
        forged.parent_hash = Default::default();
        assert!(matches!(
            BasicValidator.validate_header(&forged, &config.genesis),
            Err(ValidationError::ParentMismatch { number: 1 })
        ));
    }

    #[test]
    fn rejects_bad_fields() {
        let config = ChainConfig::devnet();
        let header = generate_blocks(&config, &config.genesis, 1).remove(0).header;

        let mut zero = header.clone();
        zero.difficulty = U256::ZERO;
        assert!(BasicValidator.validate_header(&zero, &config.genesis).is_err());

        let mut stale = header.clone();
        stale.timestamp = config.genesis.timestamp;
        assert!(BasicValidator.validate_header(&stale, &config.genesis).is_err());

        let mut long = header;
        long.extra_data = Bytes::from(vec![0u8; MAX_EXTRA_DATA_BYTES + 1]);
        assert!(BasicValidator.validate_header(&long, &config.genesis).is_err());
    }
}
