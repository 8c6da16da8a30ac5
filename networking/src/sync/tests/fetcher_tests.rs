use std::{sync::Arc, time::Duration};

use alloy_primitives::U256;
use containers::{Header, Status};
use metrics::Metrics;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::{ETH_OFFSET, detached_peer, wait_until};
use crate::{
    sync::{FetchError, FetchRequest, FetchResponse, Fetcher, PeerManager, SyncConfig, SyncPeer},
    types::PeerId,
    wire::{EthMessage, HashOrNumber, ProtocolMessage, session::Outbound},
};

struct Harness {
    fetcher: Arc<Fetcher>,
    peers: Arc<Mutex<PeerManager>>,
    metrics: Arc<Metrics>,
}

impl Harness {
    fn new(config: SyncConfig) -> Self {
        let peers = Arc::new(Mutex::new(PeerManager::new()));
        let metrics = Arc::new(Metrics::new());
        let fetcher = Arc::new(Fetcher::new(peers.clone(), metrics.clone(), &config));
        Self {
            fetcher,
            peers,
            metrics,
        }
    }

    fn add_peer(&self) -> (PeerId, UnboundedReceiver<Outbound>) {
        let (eth, eth_rx, _) = detached_peer(false);
        let status = Status {
            total_difficulty: U256::from(100),
            ..Status::default()
        };
        let peer = SyncPeer::new(PeerId::random(), eth, 67, None, &status);
        let peer_id = peer.peer_id;
        self.peers.lock().register(peer);
        (peer_id, eth_rx)
    }

    fn timeouts(&self, peer: &PeerId) -> u32 {
        self.peers.lock().get(peer).map(|peer| peer.timeouts).unwrap_or_default()
    }
}

fn headers_request() -> FetchRequest {
    FetchRequest::Headers {
        start: HashOrNumber::Number(1),
        limit: 1,
        skip: 0,
        reverse: false,
    }
}

/// Request id of the next header request the peer received.
async fn next_request_id(requests: &mut UnboundedReceiver<Outbound>) -> u64 {
    let Some(Outbound::Frame(frame)) = requests.recv().await else {
        panic!("peer received no request");
    };
    match EthMessage::decode_payload(frame.code - ETH_OFFSET, &frame.data).unwrap() {
        EthMessage::GetBlockHeaders(request) => request.request_id,
        other => panic!("unexpected request {other:?}"),
    }
}

#[tokio::test]
async fn test_response_resolves_request() {
    let harness = Harness::new(SyncConfig::default());
    let (peer, mut requests) = harness.add_peer();
    let cancel = CancellationToken::new();

    let fetcher = harness.fetcher.clone();
    let token = cancel.clone();
    let pending = tokio::spawn(async move { fetcher.fetch(peer, headers_request(), &token).await });

    let id = next_request_id(&mut requests).await;
    let headers = vec![Header::default()];
    assert!(harness.fetcher.deliver(peer, id, FetchResponse::Headers(headers.clone())));

    assert_eq!(pending.await.unwrap(), Ok(FetchResponse::Headers(headers)));
    assert_eq!(harness.metrics.in_count("headers"), 1);
    assert_eq!(harness.fetcher.pending(), 0);
    assert_eq!(harness.peers.lock().get(&peer).unwrap().requests_in_flight, 0);
}

#[tokio::test]
async fn test_unrequested_responses_are_dropped() {
    let harness = Harness::new(SyncConfig::default());
    let (peer, mut requests) = harness.add_peer();
    let (stranger, _stranger_requests) = harness.add_peer();
    let cancel = CancellationToken::new();

    // no request with this id
    assert!(!harness.fetcher.deliver(peer, 999, FetchResponse::Headers(vec![])));

    let fetcher = harness.fetcher.clone();
    let token = cancel.clone();
    let pending = tokio::spawn(async move { fetcher.fetch(peer, headers_request(), &token).await });
    let id = next_request_id(&mut requests).await;

    // right id, wrong peer
    assert!(!harness.fetcher.deliver(stranger, id, FetchResponse::Headers(vec![])));
    // right id and peer, wrong kind
    assert!(!harness.fetcher.deliver(peer, id, FetchResponse::Bodies(vec![])));
    assert_eq!(harness.fetcher.pending(), 1);

    assert!(harness.fetcher.deliver(peer, id, FetchResponse::Headers(vec![])));
    assert!(pending.await.unwrap().is_ok());

    assert_eq!(harness.metrics.drop_count("headers"), 2);
    assert_eq!(harness.metrics.drop_count("bodies"), 1);
    assert_eq!(harness.metrics.in_count("headers"), 1);
    assert_eq!(harness.timeouts(&peer), 0);
    assert_eq!(harness.timeouts(&stranger), 0);
}

#[tokio::test]
async fn test_timeout_penalises_peer_once() {
    let config = SyncConfig::default().with_request_timeout(Duration::from_millis(50));
    let harness = Harness::new(config);
    let (peer, mut requests) = harness.add_peer();
    let cancel = CancellationToken::new();

    let result = harness.fetcher.fetch(peer, headers_request(), &cancel).await;
    assert_eq!(result, Err(FetchError::Timeout(peer)));
    assert_eq!(harness.metrics.timeout_count("headers"), 1);
    assert_eq!(harness.timeouts(&peer), 1);
    assert_eq!(harness.fetcher.pending(), 0);

    // a late answer is a drop, not a second penalty
    let id = next_request_id(&mut requests).await;
    assert!(!harness.fetcher.deliver(peer, id, FetchResponse::Headers(vec![])));
    assert_eq!(harness.metrics.drop_count("headers"), 1);
    assert_eq!(harness.timeouts(&peer), 1);
}

#[tokio::test]
async fn test_throttled_request_waits_for_permit() {
    let config = SyncConfig {
        max_header_requests: 1,
        ..SyncConfig::default()
    };
    let harness = Harness::new(config);
    let (peer, mut requests) = harness.add_peer();
    let cancel = CancellationToken::new();

    let first = {
        let (fetcher, token) = (harness.fetcher.clone(), cancel.clone());
        tokio::spawn(async move { fetcher.fetch(peer, headers_request(), &token).await })
    };
    let first_id = next_request_id(&mut requests).await;

    let second = {
        let (fetcher, token) = (harness.fetcher.clone(), cancel.clone());
        tokio::spawn(async move { fetcher.fetch(peer, headers_request(), &token).await })
    };
    let metrics = harness.metrics.clone();
    wait_until(|| metrics.throttle_count() == 1).await;
    // queued, not sent
    assert_eq!(harness.fetcher.pending(), 1);
    assert!(requests.try_recv().is_err());

    harness.fetcher.deliver(peer, first_id, FetchResponse::Headers(vec![]));
    assert!(first.await.unwrap().is_ok());

    let second_id = next_request_id(&mut requests).await;
    harness.fetcher.deliver(peer, second_id, FetchResponse::Headers(vec![]));
    assert!(second.await.unwrap().is_ok());
    assert_eq!(harness.metrics.throttle_count(), 1);
}

#[tokio::test]
async fn test_cancel_releases_without_penalty() {
    let harness = Harness::new(SyncConfig::default());
    let (peer, mut requests) = harness.add_peer();
    let cancel = CancellationToken::new();

    let pending = {
        let (fetcher, token) = (harness.fetcher.clone(), cancel.clone());
        tokio::spawn(async move { fetcher.fetch(peer, headers_request(), &token).await })
    };
    next_request_id(&mut requests).await;

    cancel.cancel();
    assert_eq!(pending.await.unwrap(), Err(FetchError::Cancelled));
    assert_eq!(harness.fetcher.pending(), 0);
    assert_eq!(harness.timeouts(&peer), 0);
    assert_eq!(harness.metrics.timeout_count("headers"), 0);
}

#[tokio::test]
async fn test_dropped_fetch_releases_its_request() {
    let harness = Harness::new(SyncConfig::default());
    let (peer, mut requests) = harness.add_peer();
    let cancel = CancellationToken::new();

    let pending = {
        let (fetcher, token) = (harness.fetcher.clone(), cancel.clone());
        tokio::spawn(async move { fetcher.fetch(peer, headers_request(), &token).await })
    };
    let id = next_request_id(&mut requests).await;
    assert_eq!(harness.fetcher.pending(), 1);
    assert_eq!(harness.peers.lock().get(&peer).unwrap().requests_in_flight, 1);

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    assert_eq!(harness.fetcher.pending(), 0);
    assert_eq!(harness.peers.lock().get(&peer).unwrap().requests_in_flight, 0);
    assert!(!harness.fetcher.deliver(peer, id, FetchResponse::Headers(vec![])));
    assert_eq!(harness.timeouts(&peer), 0);
}

#[tokio::test]
async fn test_release_peer_fails_pending_requests() {
    let harness = Harness::new(SyncConfig::default());
    let (peer, mut requests) = harness.add_peer();
    let cancel = CancellationToken::new();

    let pending = {
        let (fetcher, token) = (harness.fetcher.clone(), cancel.clone());
        tokio::spawn(async move { fetcher.fetch(peer, headers_request(), &token).await })
    };
    next_request_id(&mut requests).await;

    assert_eq!(harness.fetcher.release_peer(&peer), 1);
    assert_eq!(pending.await.unwrap(), Err(FetchError::PeerDropped(peer)));
    assert_eq!(harness.timeouts(&peer), 0);
}

#[tokio::test]
async fn test_unknown_peer_is_unavailable() {
    let harness = Harness::new(SyncConfig::default());
    let stranger = PeerId::random();

    let result = harness
        .fetcher
        .fetch(stranger, headers_request(), &CancellationToken::new())
        .await;
    assert_eq!(result, Err(FetchError::PeerUnavailable(stranger)));
}
