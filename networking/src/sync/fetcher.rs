//! Request/response matching for sync downloads.
//!
//! Every outgoing request gets an id and an entry in the in-flight table. Responses
//! are handed in by the peer handlers through [`Fetcher::deliver`] and resolve the
//! waiting caller when kind, peer and id all match. Anything else is counted as a
//! drop and discarded.
use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy_primitives::B256;
use containers::{AccountRange, BlockBody, Header, Receipt};
use metrics::SharedMetrics;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{Semaphore, TryAcquireError, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{config::SyncConfig, peer_manager::PeerManager};
use crate::{
    types::PeerId,
    wire::{
        EthMessage, HashOrNumber, ProtocolSender, SnapMessage, WireError,
        eth::{GetBlockBodies, GetBlockHeaders, GetReceipts},
        snap::GetAccountRange,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Headers,
    Bodies,
    Receipts,
    AccountRange,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Headers => "headers",
            FetchKind::Bodies => "bodies",
            FetchKind::Receipts => "receipts",
            FetchKind::AccountRange => "accounts",
        }
    }

    fn index(&self) -> usize {
        match self {
            FetchKind::Headers => 0,
            FetchKind::Bodies => 1,
            FetchKind::Receipts => 2,
            FetchKind::AccountRange => 3,
        }
    }
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    Headers {
        start: HashOrNumber,
        limit: u64,
        skip: u64,
        reverse: bool,
    },
    Bodies(Vec<B256>),
    Receipts(Vec<B256>),
    AccountRange {
        root: B256,
        origin: B256,
        limit: u64,
    },
}

impl FetchRequest {
    pub fn kind(&self) -> FetchKind {
        match self {
            FetchRequest::Headers { .. } => FetchKind::Headers,
            FetchRequest::Bodies(_) => FetchKind::Bodies,
            FetchRequest::Receipts(_) => FetchKind::Receipts,
            FetchRequest::AccountRange { .. } => FetchKind::AccountRange,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    Headers(Vec<Header>),
    Bodies(Vec<BlockBody>),
    Receipts(Vec<Vec<Receipt>>),
    AccountRange(AccountRange),
}

impl FetchResponse {
    pub fn kind(&self) -> FetchKind {
        match self {
            FetchResponse::Headers(_) => FetchKind::Headers,
            FetchResponse::Bodies(_) => FetchKind::Bodies,
            FetchResponse::Receipts(_) => FetchKind::Receipts,
            FetchResponse::AccountRange(_) => FetchKind::AccountRange,
        }
    }
}

/// Protocol handle a request goes out on.
#[derive(Debug, Clone)]
pub enum RequestSender {
    Eth(ProtocolSender<EthMessage>),
    Snap(ProtocolSender<SnapMessage>),
}

impl RequestSender {
    pub fn send_request(&self, request_id: u64, request: &FetchRequest) -> Result<(), WireError> {
        match (self, request) {
            (
                RequestSender::Eth(eth),
                FetchRequest::Headers {
                    start,
                    limit,
                    skip,
                    reverse,
                },
            ) => eth.send(&EthMessage::GetBlockHeaders(GetBlockHeaders {
                request_id,
                start: *start,
                limit: *limit,
                skip: *skip,
                reverse: *reverse,
            })),
            (RequestSender::Eth(eth), FetchRequest::Bodies(hashes)) => {
                eth.send(&EthMessage::GetBlockBodies(GetBlockBodies {
                    request_id,
                    hashes: hashes.clone(),
                }))
            }
            (RequestSender::Eth(eth), FetchRequest::Receipts(hashes)) => {
                eth.send(&EthMessage::GetReceipts(GetReceipts {
                    request_id,
                    hashes: hashes.clone(),
                }))
            }
            (RequestSender::Snap(snap), FetchRequest::AccountRange { root, origin, limit }) => {
                snap.send(&SnapMessage::GetAccountRange(GetAccountRange {
                    request_id,
                    root: *root,
                    origin: *origin,
                    limit: *limit,
                }))
            }
            _ => Err(WireError::Unexpected("request kind does not match protocol")),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("peer {0} did not answer in time")]
    Timeout(PeerId),
    #[error("peer {0} dropped while the request was pending")]
    PeerDropped(PeerId),
    #[error("peer {0} cannot serve the request")]
    PeerUnavailable(PeerId),
    #[error("request cancelled")]
    Cancelled,
    #[error("request queue closed")]
    Closed,
}

struct InFlight {
    kind: FetchKind,
    peer: PeerId,
    issued_at: Instant,
    responder: oneshot::Sender<FetchResponse>,
}

/// Owns one in-flight entry and the peer's in-flight count for the lifetime of a
/// `fetch` call, so a dropped fetch future leaves nothing behind.
struct PendingGuard<'a> {
    fetcher: &'a Fetcher,
    id: u64,
    peer: PeerId,
}

impl<'a> PendingGuard<'a> {
    fn track(fetcher: &'a Fetcher, id: u64, entry: InFlight) -> Self {
        let peer = entry.peer;
        fetcher.in_flight.lock().insert(id, entry);
        fetcher.peers.lock().on_request_start(&peer);
        Self { fetcher, id, peer }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.fetcher.in_flight.lock().remove(&self.id).is_some() {
            trace!(peer = %self.peer, id = self.id, "Released unanswered request");
        }
        self.fetcher.peers.lock().on_request_complete(&self.peer);
    }
}

enum Wake {
    Response(Result<FetchResponse, oneshot::error::RecvError>),
    Deadline,
    Cancelled,
}

pub struct Fetcher {
    peers: Arc<Mutex<PeerManager>>,
    metrics: SharedMetrics,
    request_timeout: Duration,
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    permits: [Semaphore; 4],
}

impl Fetcher {
    pub fn new(peers: Arc<Mutex<PeerManager>>, metrics: SharedMetrics, config: &SyncConfig) -> Self {
        Self {
            peers,
            metrics,
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
            permits: [
                Semaphore::new(config.max_header_requests),
                Semaphore::new(config.max_body_requests),
                Semaphore::new(config.max_receipt_requests),
                Semaphore::new(config.max_account_requests),
            ],
        }
    }

    /// Sends `request` to `peer` and waits for the matching response.
    ///
    /// A timeout penalises the peer. Cancellation and disconnects do not.
    pub async fn fetch(
        &self,
        peer: PeerId,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let kind = request.kind();
        let semaphore = &self.permits[kind.index()];
        let _permit = match semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(FetchError::Closed),
            Err(TryAcquireError::NoPermits) => {
                self.metrics.inc_throttle();
                debug!(peer = %peer, %kind, "Request throttled");
                tokio::select! {
                    permit = semaphore.acquire() => permit.map_err(|_| FetchError::Closed)?,
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                }
            }
        };
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let sender = self
            .peers
            .lock()
            .sender_for(&peer, kind)
            .ok_or(FetchError::PeerUnavailable(peer))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let issued_at = Instant::now();
        let deadline = issued_at + self.request_timeout;
        let _pending = PendingGuard::track(
            self,
            id,
            InFlight {
                kind,
                peer,
                issued_at,
                responder: tx,
            },
        );

        if let Err(err) = sender.send_request(id, &request) {
            debug!(peer = %peer, %kind, %err, "Request not sent");
            return Err(FetchError::PeerDropped(peer));
        }
        debug!(peer = %peer, id, %kind, "Request sent");

        let result = self.wait(id, peer, kind, rx, deadline, cancel).await;
        if result.is_ok() {
            self.peers.lock().reward(&peer);
            self.metrics
                .observe_request_time(kind.as_str(), issued_at.elapsed().as_secs_f64());
        }
        result
    }

    async fn wait(
        &self,
        id: u64,
        peer: PeerId,
        kind: FetchKind,
        mut rx: oneshot::Receiver<FetchResponse>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let wake = tokio::select! {
            response = &mut rx => Wake::Response(response),
            _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
            _ = cancel.cancelled() => Wake::Cancelled,
        };

        match wake {
            Wake::Response(response) => response.map_err(|_| FetchError::PeerDropped(peer)),
            Wake::Deadline => {
                let expired = self.in_flight.lock().remove(&id).is_some();
                if !expired {
                    // resolved or released while the deadline fired
                    return rx.await.map_err(|_| FetchError::PeerDropped(peer));
                }
                self.metrics.inc_timeout(kind.as_str());
                let timeouts = self.peers.lock().penalize(&peer);
                warn!(peer = %peer, id, %kind, timeouts, "Request timed out");
                Err(FetchError::Timeout(peer))
            }
            Wake::Cancelled => {
                self.in_flight.lock().remove(&id);
                Err(FetchError::Cancelled)
            }
        }
    }

    /// Hands a response to its waiting request.
    ///
    /// Returns false, and counts a drop, if nothing is waiting for it.
    pub fn deliver(&self, peer: PeerId, request_id: u64, response: FetchResponse) -> bool {
        let kind = response.kind();
        let matched = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.entry(request_id) {
                Entry::Occupied(entry) if entry.get().peer == peer && entry.get().kind == kind => {
                    Some(entry.remove())
                }
                _ => None,
            }
        };

        let Some(pending) = matched else {
            self.metrics.inc_drop(kind.as_str());
            trace!(peer = %peer, id = request_id, %kind, "Dropped unrequested response");
            return false;
        };

        self.metrics.inc_in(kind.as_str());
        trace!(
            peer = %peer,
            id = request_id,
            %kind,
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            "Response delivered"
        );
        if pending.responder.send(response).is_err() {
            trace!(peer = %peer, id = request_id, "Requester gone");
        }
        true
    }

    /// Fails every request pending on `peer`. Returns how many were released.
    pub fn release_peer(&self, peer: &PeerId) -> usize {
        let mut in_flight = self.in_flight.lock();
        let before = in_flight.len();
        in_flight.retain(|_, pending| pending.peer != *peer);
        before - in_flight.len()
    }

    /// Requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.in_flight.lock().len()
    }
}
