use std::{cmp::Reverse, collections::HashMap, collections::HashSet};

use alloy_primitives::{B256, U256};
use containers::Status;
use tracing::{debug, warn};

use super::{
    config::{MAX_PEER_TIMEOUTS, TIMEOUT_DECAY_SUCCESSES},
    fetcher::{FetchKind, RequestSender},
};
use crate::{
    types::{ConnectionState, PeerCount, PeerId},
    wire::{
        EthMessage, ProtocolSender, SnapMessage,
        eth::NewBlockHashes,
    },
};

/// Sync-specific peer state.
///
/// Wraps a connected peer's protocol handles with its advertised chain head and
/// request bookkeeping.
#[derive(Debug, Clone)]
pub struct SyncPeer {
    pub peer_id: PeerId,
    pub connection_state: ConnectionState,
    pub eth: ProtocolSender<EthMessage>,
    pub eth_version: u64,
    pub snap: Option<ProtocolSender<SnapMessage>>,
    pub head: B256,
    /// Unknown until the peer announces a block by number.
    pub head_number: Option<u64>,
    pub total_difficulty: U256,
    pub registered_seq: u64,
    pub timeouts: u32,
    /// Successful responses since the last timeout or decay step.
    pub success_streak: u32,
    pub requests_in_flight: usize,
}

impl SyncPeer {
    pub fn new(
        peer_id: PeerId,
        eth: ProtocolSender<EthMessage>,
        eth_version: u64,
        snap: Option<ProtocolSender<SnapMessage>>,
        status: &Status,
    ) -> Self {
        Self {
            peer_id,
            connection_state: ConnectionState::Connected,
            eth,
            eth_version,
            snap,
            head: status.head,
            head_number: None,
            total_difficulty: status.total_difficulty,
            registered_seq: 0,
            timeouts: 0,
            success_streak: 0,
            requests_in_flight: 0,
        }
    }

    /// Check if peer is connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    pub fn has_snap(&self) -> bool {
        self.snap.is_some()
    }

    /// Peers that timed out too often are only used as a last resort.
    pub fn is_penalized(&self) -> bool {
        self.timeouts >= MAX_PEER_TIMEOUTS
    }

    pub fn can_serve(&self, kind: FetchKind) -> bool {
        self.is_connected() && (kind != FetchKind::AccountRange || self.has_snap())
    }

    /// Mark that a request has been sent to this peer.
    pub fn on_request_start(&mut self) {
        self.requests_in_flight += 1;
    }

    /// Mark that a request has completed.
    pub fn on_request_complete(&mut self) {
        self.requests_in_flight = self.requests_in_flight.saturating_sub(1);
    }
}

/// Registry of peers usable for sync.
///
/// Tracks every peer's advertised head and reliability, picks sync targets and
/// spreads requests across peers.
#[derive(Debug, Default)]
pub struct PeerManager {
    peers: HashMap<PeerId, SyncPeer>,
    next_seq: u64,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Registering an id twice keeps the first entry.
    pub fn register(&mut self, mut peer: SyncPeer) -> bool {
        if self.peers.contains_key(&peer.peer_id) {
            return false;
        }
        peer.registered_seq = self.next_seq;
        self.next_seq += 1;
        self.peers.insert(peer.peer_id, peer);
        true
    }

    /// Remove a peer. Unknown ids are ignored.
    pub fn unregister(&mut self, peer_id: &PeerId) -> Option<SyncPeer> {
        self.peers.remove(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&SyncPeer> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Record a head announcement. Returns false for unknown peers.
    pub fn update_head(
        &mut self,
        peer_id: &PeerId,
        head: B256,
        number: u64,
        total_difficulty: U256,
    ) -> bool {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return false;
        };
        peer.head = head;
        peer.head_number = Some(number);
        peer.total_difficulty = total_difficulty;
        true
    }

    /// Update peer connection state.
    pub fn update_connection_state(&mut self, peer_id: &PeerId, state: ConnectionState) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.connection_state = state;
        }
    }

    /// Heaviest peer above `local_td`, earliest registration winning ties.
    ///
    /// Penalized peers are only chosen when no other peer qualifies.
    pub fn best_sync_target(&self, local_td: U256) -> Option<PeerId> {
        self.peers
            .values()
            .filter(|peer| peer.is_connected() && peer.total_difficulty > local_td)
            .max_by_key(|peer| {
                (
                    !peer.is_penalized(),
                    peer.total_difficulty,
                    Reverse(peer.registered_seq),
                )
            })
            .map(|peer| peer.peer_id)
    }

    /// Select a peer for a request of `kind`, skipping `exclude`.
    ///
    /// Prefers peers with fewer timeouts, then fewer requests in flight.
    pub fn select_peer_for_request(
        &self,
        kind: FetchKind,
        exclude: &HashSet<PeerId>,
    ) -> Option<PeerId> {
        self.peers
            .values()
            .filter(|peer| peer.can_serve(kind) && !exclude.contains(&peer.peer_id))
            .min_by_key(|peer| (peer.timeouts, peer.requests_in_flight, peer.registered_seq))
            .map(|peer| peer.peer_id)
    }

    pub fn can_serve(&self, peer_id: &PeerId, kind: FetchKind) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|peer| peer.can_serve(kind))
    }

    pub fn sender_for(&self, peer_id: &PeerId, kind: FetchKind) -> Option<RequestSender> {
        let peer = self.peers.get(peer_id).filter(|peer| peer.can_serve(kind))?;
        match kind {
            FetchKind::AccountRange => peer.snap.clone().map(RequestSender::Snap),
            _ => Some(RequestSender::Eth(peer.eth.clone())),
        }
    }

    /// Count a timeout against the peer. Returns the new count.
    pub fn penalize(&mut self, peer_id: &PeerId) -> u32 {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return 0;
        };
        peer.timeouts += 1;
        peer.success_streak = 0;
        if peer.timeouts == MAX_PEER_TIMEOUTS {
            warn!(peer = %peer_id, timeouts = peer.timeouts, "Peer deprioritised");
        }
        peer.timeouts
    }

    /// Counts a successful response. Every `TIMEOUT_DECAY_SUCCESSES` in a row
    /// work off one timeout; a timeout resets the streak.
    pub fn reward(&mut self, peer_id: &PeerId) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        if peer.timeouts == 0 {
            return;
        }
        peer.success_streak += 1;
        if peer.success_streak >= TIMEOUT_DECAY_SUCCESSES {
            peer.success_streak = 0;
            peer.timeouts -= 1;
        }
    }

    /// Mark that a request has been sent to a peer.
    pub fn on_request_start(&mut self, peer_id: &PeerId) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.on_request_start();
        }
    }

    /// Mark that a request has completed.
    pub fn on_request_complete(&mut self, peer_id: &PeerId) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.on_request_complete();
        }
    }

    /// Announce our new head to every peer.
    pub fn broadcast_head(&self, announcement: &NewBlockHashes) {
        let message = EthMessage::NewBlockHashes(announcement.clone());
        for peer in self.peers.values().filter(|peer| peer.is_connected()) {
            if let Err(err) = peer.eth.send(&message) {
                debug!(peer = %peer.peer_id, %err, "Head announcement not sent");
            }
        }
    }

    pub fn peer_count(&self) -> PeerCount {
        PeerCount::new(self.peers.values().map(|peer| &peer.connection_state))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
