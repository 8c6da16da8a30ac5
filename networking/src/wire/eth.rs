use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use containers::{BlockBody, Header, Receipt, Status};

use super::{
    codec::{self, WireError},
    session::ProtocolMessage,
};

pub const PROTOCOL_NAME: &str = "eth";
pub const PROTOCOL_LENGTH: u64 = 17;

pub const ETH66: u64 = 66;
pub const ETH67: u64 = 67;

pub const STATUS: u64 = 0x00;
pub const NEW_BLOCK_HASHES: u64 = 0x01;
pub const GET_BLOCK_HEADERS: u64 = 0x03;
pub const BLOCK_HEADERS: u64 = 0x04;
pub const GET_BLOCK_BODIES: u64 = 0x05;
pub const BLOCK_BODIES: u64 = 0x06;
pub const GET_RECEIPTS: u64 = 0x0f;
pub const RECEIPTS: u64 = 0x10;

/// Origin of a header request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(B256),
    Number(u64),
}

impl From<B256> for HashOrNumber {
    fn from(hash: B256) -> Self {
        HashOrNumber::Hash(hash)
    }
}

impl From<u64> for HashOrNumber {
    fn from(number: u64) -> Self {
        HashOrNumber::Number(number)
    }
}

impl Encodable for HashOrNumber {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            HashOrNumber::Hash(hash) => hash.encode(out),
            HashOrNumber::Number(number) => number.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            HashOrNumber::Hash(hash) => hash.length(),
            HashOrNumber::Number(number) => number.length(),
        }
    }
}

impl Decodable for HashOrNumber {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let Some(&first) = buf.first() else {
            return Err(alloy_rlp::Error::InputTooShort);
        };
        // 0xa0 is the string header of exactly 32 bytes; numbers never use it
        if first == 0xa0 {
            return B256::decode(buf).map(HashOrNumber::Hash);
        }
        u64::decode(buf).map(HashOrNumber::Number)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockAnnouncement {
    pub hash: B256,
    pub number: u64,
    pub total_difficulty: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct NewBlockHashes {
    pub announcements: Vec<BlockAnnouncement>,
}

impl NewBlockHashes {
    pub fn single(hash: B256, number: u64, total_difficulty: U256) -> Self {
        Self {
            announcements: vec![BlockAnnouncement {
                hash,
                number,
                total_difficulty,
            }],
        }
    }

    /// Announcement carrying the most cumulative difficulty.
    pub fn best(&self) -> Option<&BlockAnnouncement> {
        self.announcements
            .iter()
            .max_by_key(|announcement| announcement.total_difficulty)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetBlockHeaders {
    pub request_id: u64,
    pub start: HashOrNumber,
    pub limit: u64,
    pub skip: u64,
    pub reverse: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockHeaders {
    pub request_id: u64,
    pub headers: Vec<Header>,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetBlockBodies {
    pub request_id: u64,
    pub hashes: Vec<B256>,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockBodies {
    pub request_id: u64,
    pub bodies: Vec<BlockBody>,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetReceipts {
    pub request_id: u64,
    pub hashes: Vec<B256>,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Receipts {
    pub request_id: u64,
    pub receipts: Vec<Vec<Receipt>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EthMessage {
    Status(Status),
    NewBlockHashes(NewBlockHashes),
    GetBlockHeaders(GetBlockHeaders),
    BlockHeaders(BlockHeaders),
    GetBlockBodies(GetBlockBodies),
    BlockBodies(BlockBodies),
    GetReceipts(GetReceipts),
    Receipts(Receipts),
}

impl ProtocolMessage for EthMessage {
    fn code(&self) -> u64 {
        match self {
            EthMessage::Status(_) => STATUS,
            EthMessage::NewBlockHashes(_) => NEW_BLOCK_HASHES,
            EthMessage::GetBlockHeaders(_) => GET_BLOCK_HEADERS,
            EthMessage::BlockHeaders(_) => BLOCK_HEADERS,
            EthMessage::GetBlockBodies(_) => GET_BLOCK_BODIES,
            EthMessage::BlockBodies(_) => BLOCK_BODIES,
            EthMessage::GetReceipts(_) => GET_RECEIPTS,
            EthMessage::Receipts(_) => RECEIPTS,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            EthMessage::Status(_) => "Status",
            EthMessage::NewBlockHashes(_) => "NewBlockHashes",
            EthMessage::GetBlockHeaders(_) => "GetBlockHeaders",
            EthMessage::BlockHeaders(_) => "BlockHeaders",
            EthMessage::GetBlockBodies(_) => "GetBlockBodies",
            EthMessage::BlockBodies(_) => "BlockBodies",
            EthMessage::GetReceipts(_) => "GetReceipts",
            EthMessage::Receipts(_) => "Receipts",
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, WireError> {
        match self {
            EthMessage::Status(msg) => codec::encode(msg),
            EthMessage::NewBlockHashes(msg) => codec::encode(msg),
            EthMessage::GetBlockHeaders(msg) => codec::encode(msg),
            EthMessage::BlockHeaders(msg) => codec::encode(msg),
            EthMessage::GetBlockBodies(msg) => codec::encode(msg),
            EthMessage::BlockBodies(msg) => codec::encode(msg),
            EthMessage::GetReceipts(msg) => codec::encode(msg),
            EthMessage::Receipts(msg) => codec::encode(msg),
        }
    }

    fn decode_payload(code: u64, data: &[u8]) -> Result<Self, WireError> {
        Ok(match code {
            STATUS => EthMessage::Status(codec::decode(data)?),
            NEW_BLOCK_HASHES => EthMessage::NewBlockHashes(codec::decode(data)?),
            GET_BLOCK_HEADERS => EthMessage::GetBlockHeaders(codec::decode(data)?),
            BLOCK_HEADERS => EthMessage::BlockHeaders(codec::decode(data)?),
            GET_BLOCK_BODIES => EthMessage::GetBlockBodies(codec::decode(data)?),
            BLOCK_BODIES => EthMessage::BlockBodies(codec::decode(data)?),
            GET_RECEIPTS => EthMessage::GetReceipts(codec::decode(data)?),
            RECEIPTS => EthMessage::Receipts(codec::decode(data)?),
            other => return Err(WireError::UnknownCode(other)),
        })
    }
}
