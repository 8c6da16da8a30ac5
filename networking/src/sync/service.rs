use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use alloy_primitives::{B256, U256};
use chain::{BlockChain, HeaderValidator};
use metrics::SharedMetrics;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{Notify, watch},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    config::SyncConfig,
    downloader::Downloader,
    fetcher::{FetchResponse, Fetcher},
    mode::{SyncMode, SyncModeFlag},
    peer_manager::{PeerManager, SyncPeer},
    progress::SyncProgress,
    states::{StateCell, SyncState},
};
use crate::{
    types::{ConnectionState, PeerId},
    wire::eth::NewBlockHashes,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("a sync operation is already running")]
    Busy,
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("no peer can serve the request")]
    NoPeers,
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("block #{number} rejected: {reason}")]
    ImportRejected { number: u64, reason: String },
    /// Internal; surfaces as [`SyncOutcome::Cancelled`].
    #[error("sync cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { imported: u64 },
    UpToDate,
    Cancelled,
}

impl SyncOutcome {
    fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Completed { .. } => "completed",
            SyncOutcome::UpToDate => "up_to_date",
            SyncOutcome::Cancelled => "cancelled",
        }
    }
}

/// One attempt to reach `head` using `peer` as the primary source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOperation {
    pub mode: SyncMode,
    pub peer: PeerId,
    pub head: B256,
    pub total_difficulty: U256,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sync service coordinating all sync operations.
///
/// Owns the peer registry, the fetch pipeline and the sync mode flag. Peer handlers
/// feed it registrations, head announcements and responses; the run loop turns
/// those into at most one running sync operation at a time.
pub struct SyncService<C: BlockChain> {
    pub(super) chain: Arc<C>,
    pub(super) validator: Arc<dyn HeaderValidator>,
    config: SyncConfig,
    pub(super) mode: Arc<SyncModeFlag>,
    pub(super) peers: Arc<Mutex<PeerManager>>,
    pub(super) fetcher: Fetcher,
    pub(super) metrics: SharedMetrics,
    pub(super) state: StateCell,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    pub(super) progress: Mutex<SyncProgress>,
    trigger: Notify,
    /// Bumped on every registration; stalled requests wait for it to move.
    pub(super) peer_epoch: watch::Sender<u64>,
}

impl<C: BlockChain> SyncService<C> {
    /// Snap sync is only honoured on an empty chain.
    pub fn new(
        chain: Arc<C>,
        validator: Arc<dyn HeaderValidator>,
        config: SyncConfig,
        requested_mode: SyncMode,
        metrics: SharedMetrics,
    ) -> Self {
        let head = chain.current_head();
        let mode = SyncMode::for_chain(requested_mode, head.number);
        metrics.set_sync_mode(mode as i64);
        metrics.set_current_block(head.number as i64);

        let peers = Arc::new(Mutex::new(PeerManager::new()));
        let fetcher = Fetcher::new(peers.clone(), metrics.clone(), &config);
        info!(%mode, head = %head, "Sync service initialised");

        Self {
            chain,
            validator,
            config,
            mode: Arc::new(SyncModeFlag::new(mode)),
            peers,
            fetcher,
            metrics,
            state: StateCell::default(),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            progress: Mutex::new(SyncProgress::starting_at(head.number)),
            trigger: Notify::new(),
            peer_epoch: watch::Sender::new(0),
        }
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current sync mode.
    pub fn mode(&self) -> SyncMode {
        self.mode.get()
    }

    pub fn mode_flag(&self) -> Arc<SyncModeFlag> {
        self.mode.clone()
    }

    pub fn peers(&self) -> Arc<Mutex<PeerManager>> {
        self.peers.clone()
    }

    /// Get current sync state.
    pub fn state(&self) -> SyncState {
        self.state.get()
    }

    pub fn progress(&self) -> SyncProgress {
        *self.progress.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Add a peer to the sync service.
    pub fn register_peer(&self, peer: SyncPeer) -> bool {
        let peer_id = peer.peer_id;
        let total_difficulty = peer.total_difficulty;
        let added = {
            let mut peers = self.peers.lock();
            let added = peers.register(peer);
            self.metrics.set_peers(peers.peer_count().connected as i64);
            added
        };
        if !added {
            debug!(peer = %peer_id, "Peer already registered");
            return false;
        }

        info!(peer = %peer_id, td = %total_difficulty, "Peer registered");
        self.peer_epoch.send_modify(|epoch| *epoch += 1);
        if self.chain.current_head().is_behind(total_difficulty) {
            self.trigger.notify_one();
        }
        true
    }

    /// Stop selecting a peer whose connection is being torn down.
    pub fn mark_disconnecting(&self, peer_id: &PeerId) {
        let mut peers = self.peers.lock();
        peers.update_connection_state(peer_id, ConnectionState::Disconnecting);
        self.metrics.set_peers(peers.peer_count().connected as i64);
        debug!(peer = %peer_id, "Peer disconnecting");
    }

    /// Remove a peer and fail everything still pending on it.
    pub fn unregister_peer(&self, peer_id: &PeerId) {
        let removed = {
            let mut peers = self.peers.lock();
            let removed = peers.unregister(peer_id);
            self.metrics.set_peers(peers.peer_count().connected as i64);
            removed
        };
        if removed.is_none() {
            return;
        }
        let released = self.fetcher.release_peer(peer_id);
        info!(peer = %peer_id, released, "Peer removed");
    }

    /// Record a head announcement. A strictly heavier head wakes the run loop.
    pub fn update_peer_head(&self, peer_id: &PeerId, head: B256, number: u64, total_difficulty: U256) {
        if !self
            .peers
            .lock()
            .update_head(peer_id, head, number, total_difficulty)
        {
            return;
        }
        debug!(peer = %peer_id, number, td = %total_difficulty, "Peer head updated");
        if self.chain.current_head().is_behind(total_difficulty) {
            self.trigger.notify_one();
        }
    }

    /// Route a response to the request waiting for it.
    pub fn deliver(&self, peer: PeerId, request_id: u64, response: FetchResponse) -> bool {
        self.fetcher.deliver(peer, request_id, response)
    }

    /// The operation the run loop would start now, if any peer is ahead of us.
    pub fn best_operation(&self) -> Option<SyncOperation> {
        let local = self.chain.current_head();
        let peers = self.peers.lock();
        let peer_id = peers.best_sync_target(local.total_difficulty)?;
        let peer = peers.get(&peer_id)?;
        Some(SyncOperation {
            mode: self.mode.get(),
            peer: peer_id,
            head: peer.head,
            total_difficulty: peer.total_difficulty,
        })
    }

    /// Sync towards the head `peer_id` advertised.
    pub async fn synchronise(&self, peer_id: PeerId, mode: SyncMode) -> Result<SyncOutcome, SyncError> {
        let op = {
            let peers = self.peers.lock();
            let peer = peers.get(&peer_id).ok_or(SyncError::UnknownPeer(peer_id))?;
            SyncOperation {
                mode,
                peer: peer_id,
                head: peer.head,
                total_difficulty: peer.total_difficulty,
            }
        };
        self.do_sync(op).await
    }

    /// Runs one sync operation. Only one runs at a time; others get `Busy`.
    pub async fn do_sync(&self, op: SyncOperation) -> Result<SyncOutcome, SyncError> {
        // token is published under the same lock `cancel()` takes, so a cancel
        // that sees the operation running always finds its token
        let cancel = {
            let mut slot = self.cancel.lock();
            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!(peer = %op.peer, "Sync already running");
                return Err(SyncError::Busy);
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };
        let _running = RunningGuard(&self.running);

        let result = self.run_operation(&op, &cancel).await;
        *self.cancel.lock() = None;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "failed",
        };
        self.metrics.inc_sync_operation(label);
        result
    }

    async fn run_operation(
        &self,
        op: &SyncOperation,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        self.state.transition(SyncState::Selecting);

        let local = self.chain.current_head();
        if !local.is_behind(op.total_difficulty) {
            debug!(peer = %op.peer, local = %local, "Nothing to sync");
            self.state.transition(SyncState::Idle);
            return Ok(SyncOutcome::UpToDate);
        }

        *self.progress.lock() = SyncProgress::starting_at(local.number);
        info!(peer = %op.peer, mode = %op.mode, local = %local, "Sync operation started");

        match Downloader::new(self, op, cancel).run().await {
            Ok(imported) => {
                let head = self.chain.current_head();
                if op.mode != SyncMode::LightSync {
                    if head.number > 0 && self.mode.disable_snap_sync() {
                        info!(head = %head, "Snap sync complete, switching to full sync");
                        self.metrics.set_sync_mode(SyncMode::FullSync as i64);
                    }
                    self.peers.lock().broadcast_head(&NewBlockHashes::single(
                        head.hash,
                        head.number,
                        head.total_difficulty,
                    ));
                }
                self.state.transition(SyncState::Idle);
                info!(head = %head, imported, "Sync operation complete");
                Ok(SyncOutcome::Completed { imported })
            }
            Err(SyncError::Cancelled) => {
                self.state.transition(SyncState::Cancelled);
                self.state.transition(SyncState::Idle);
                info!(peer = %op.peer, "Sync operation cancelled");
                Ok(SyncOutcome::Cancelled)
            }
            Err(err) => {
                self.state.transition(SyncState::Failed);
                self.state.transition(SyncState::Idle);
                warn!(peer = %op.peer, %err, "Sync operation failed");
                Err(err)
            }
        }
    }

    /// Abort the running operation, if any. Outstanding requests are released
    /// without penalising their peers.
    pub fn cancel(&self) {
        if let Some(token) = self.cancel.lock().as_ref() {
            info!("Cancelling sync operation");
            token.cancel();
        }
    }

    /// Starts an operation on every tick or better head announcement until
    /// `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.cancel();
                    break;
                }
                _ = tick.tick() => {}
                _ = self.trigger.notified() => {}
            }

            if self.is_running() {
                continue;
            }
            let Some(op) = self.best_operation() else {
                continue;
            };

            let service = self.clone();
            tokio::spawn(async move {
                if let Err(err) = service.do_sync(op).await {
                    debug!(%err, "Sync attempt ended");
                }
            });
        }

        info!("Sync service stopped");
    }
}
