use alloy_primitives::B256;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use containers::AccountRange;

use super::{
    codec::{self, WireError},
    session::ProtocolMessage,
};

pub const PROTOCOL_NAME: &str = "snap";
pub const PROTOCOL_LENGTH: u64 = 8;

pub const SNAP1: u64 = 1;

pub const GET_ACCOUNT_RANGE: u64 = 0x00;
pub const ACCOUNT_RANGE: u64 = 0x01;

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetAccountRange {
    pub request_id: u64,
    pub root: B256,
    pub origin: B256,
    pub limit: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccountRangeMessage {
    pub request_id: u64,
    pub range: AccountRange,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapMessage {
    GetAccountRange(GetAccountRange),
    AccountRange(AccountRangeMessage),
}

impl ProtocolMessage for SnapMessage {
    fn code(&self) -> u64 {
        match self {
            SnapMessage::GetAccountRange(_) => GET_ACCOUNT_RANGE,
            SnapMessage::AccountRange(_) => ACCOUNT_RANGE,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SnapMessage::GetAccountRange(_) => "GetAccountRange",
            SnapMessage::AccountRange(_) => "AccountRange",
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, WireError> {
        match self {
            SnapMessage::GetAccountRange(msg) => codec::encode(msg),
            SnapMessage::AccountRange(msg) => codec::encode(msg),
        }
    }

    fn decode_payload(code: u64, data: &[u8]) -> Result<Self, WireError> {
        match code {
            GET_ACCOUNT_RANGE => Ok(SnapMessage::GetAccountRange(codec::decode(data)?)),
            ACCOUNT_RANGE => Ok(SnapMessage::AccountRange(codec::decode(data)?)),
            other => Err(WireError::UnknownCode(other)),
        }
    }
}
