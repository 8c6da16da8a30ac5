use alloy_rlp::{Decodable, Encodable};
use snap::raw::{Decoder, Encoder, decompress_len};
use thiserror::Error;

use crate::types::DisconnectReason;

/// Upper bound on the decompressed size of a single message.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed payload: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    #[error("snappy: {0}")]
    Snappy(#[from] snap::Error),
    #[error("message of {0} bytes exceeds the size limit")]
    Oversize(usize),
    #[error("unknown message code {0:#x}")]
    UnknownCode(u64),
    #[error("unexpected message: {0}")]
    Unexpected(&'static str),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
    #[error("peer disconnected: {0:?}")]
    Disconnected(DisconnectReason),
}

/// RLP-encodes `message` and compresses it with raw snappy.
pub fn encode<T: Encodable + ?Sized>(message: &T) -> Result<Vec<u8>, WireError> {
    let raw = alloy_rlp::encode(message);
    if raw.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::Oversize(raw.len()));
    }
    Ok(Encoder::new().compress_vec(&raw)?)
}

/// Inverse of [`encode`]. Rejects payloads whose declared decompressed size is
/// above [`MAX_MESSAGE_SIZE`] before allocating, and trailing bytes after the item.
pub fn decode<T: Decodable>(data: &[u8]) -> Result<T, WireError> {
    let len = decompress_len(data)?;
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::Oversize(len));
    }
    let raw = Decoder::new().decompress_vec(data)?;

    let mut buf = raw.as_slice();
    let value = T::decode(&mut buf)?;
    if !buf.is_empty() {
        return Err(alloy_rlp::Error::UnexpectedLength.into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use containers::{Header, U256};

    #[test]
    fn header_survives_codec() {
        let header = Header {
            number: 42,
            difficulty: U256::from(7u64),
            ..Header::default()
        };
        let bytes = encode(&header).unwrap();
        assert_eq!(decode::<Header>(&bytes).unwrap(), header);
    }

    #[test]
    fn rejects_uncompressed_garbage() {
        assert!(decode::<Header>(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }

    #[test]
    fn rejects_oversize_declared_length() {
        // varint-encoded decompressed length of 64 MiB followed by nothing
        let data = [0x80, 0x80, 0x80, 0x20];
        assert!(matches!(decode::<Header>(&data), Err(WireError::Oversize(_))));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut raw = alloy_rlp::encode(5u64);
        raw.push(0x01);
        let data = Encoder::new().compress_vec(&raw).unwrap();
        assert!(matches!(decode::<u64>(&data), Err(WireError::Rlp(_))));
    }
}
