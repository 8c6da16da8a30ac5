//! Answers to peer data requests, read straight from the local chain.
use chain::BlockChain;

use crate::{
    sync::config::{MAX_ACCOUNTS_SERVE, MAX_BODIES_SERVE, MAX_HEADERS_SERVE, MAX_RECEIPTS_SERVE},
    wire::{
        eth::{
            BlockBodies, BlockHeaders, GetBlockBodies, GetBlockHeaders, GetReceipts, HashOrNumber,
            Receipts,
        },
        snap::{AccountRangeMessage, GetAccountRange},
    },
};

pub fn serve_headers<C: BlockChain + ?Sized>(chain: &C, request: &GetBlockHeaders) -> BlockHeaders {
    let limit = request.limit.min(MAX_HEADERS_SERVE);
    let mut headers = Vec::new();

    let origin = match request.start {
        HashOrNumber::Hash(hash) => chain.header_by_hash(&hash),
        HashOrNumber::Number(number) => chain.header_by_number(number),
    };

    if let Some(origin) = origin.filter(|_| limit > 0) {
        let step = request.skip.saturating_add(1);
        let mut number = origin.number;
        headers.push(origin);

        while (headers.len() as u64) < limit {
            let next = if request.reverse {
                number.checked_sub(step)
            } else {
                number.checked_add(step)
            };
            let Some(header) = next.and_then(|n| chain.header_by_number(n)) else {
                break;
            };
            number = header.number;
            headers.push(header);
        }
    }

    BlockHeaders {
        request_id: request.request_id,
        headers,
    }
}

/// Unknown hashes are skipped, so the answer may be shorter than the request.
pub fn serve_bodies<C: BlockChain + ?Sized>(chain: &C, request: &GetBlockBodies) -> BlockBodies {
    let bodies = request
        .hashes
        .iter()
        .take(MAX_BODIES_SERVE)
        .filter_map(|hash| chain.body(hash))
        .collect();

    BlockBodies {
        request_id: request.request_id,
        bodies,
    }
}

pub fn serve_receipts<C: BlockChain + ?Sized>(chain: &C, request: &GetReceipts) -> Receipts {
    let receipts = request
        .hashes
        .iter()
        .take(MAX_RECEIPTS_SERVE)
        .filter_map(|hash| chain.receipts(hash))
        .collect();

    Receipts {
        request_id: request.request_id,
        receipts,
    }
}

pub fn serve_account_range<C: BlockChain + ?Sized>(
    chain: &C,
    request: &GetAccountRange,
) -> AccountRangeMessage {
    let limit = request.limit.min(MAX_ACCOUNTS_SERVE) as usize;
    AccountRangeMessage {
        request_id: request.request_id,
        range: chain.account_range(&request.root, &request.origin, limit),
    }
}
