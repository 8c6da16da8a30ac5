use std::{sync::Arc, time::Duration};

use chain::{BlockChain, ChainConfig};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    serve,
    sync::{FetchResponse, HANDSHAKE_TIMEOUT, SyncMode, SyncPeer, SyncService},
    types::{DisconnectReason, PeerId},
    wire::{
        Capability, Connection, EthMessage, HandshakeError, LocalNode, PeerConnection,
        ProtocolStream, SnapMessage, eth, handshake, snap,
    },
};

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub node_id: PeerId,
    pub client_id: String,
    /// Advertise `snap` even when not snap syncing ourselves.
    pub serve_snapshots: bool,
    pub handshake_timeout: Duration,
}

impl HandlerConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            node_id: PeerId::random(),
            client_id: client_id.into(),
            serve_snapshots: false,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_serve_snapshots(mut self, serve_snapshots: bool) -> Self {
        self.serve_snapshots = serve_snapshots;
        self
    }
}

/// A connected, registered peer. Resolves once its protocol tasks have exited and
/// it has been removed from the sync registry.
#[derive(Debug)]
pub struct PeerHandle {
    pub id: PeerId,
    task: JoinHandle<()>,
}

impl PeerHandle {
    pub async fn closed(self) {
        if let Err(err) = self.task.await {
            warn!(peer = %self.id, ?err, "Peer task failed");
        }
    }
}

/// Runs the handshake on new connections and serves the peer's `eth` and `snap`
/// traffic for as long as the connection lives.
pub struct Handler<C: BlockChain> {
    sync: Arc<SyncService<C>>,
    chain_config: ChainConfig,
    config: HandlerConfig,
}

impl<C: BlockChain> Handler<C> {
    pub fn new(sync: Arc<SyncService<C>>, chain_config: ChainConfig, config: HandlerConfig) -> Self {
        Self {
            sync,
            chain_config,
            config,
        }
    }

    pub fn node_id(&self) -> PeerId {
        self.config.node_id
    }

    pub fn sync(&self) -> &Arc<SyncService<C>> {
        &self.sync
    }

    /// Capabilities offered in the hello. `snap` is decided per connection from
    /// the current sync mode.
    pub fn local_capabilities(&self) -> Vec<Capability> {
        let mut capabilities = vec![
            Capability::new(eth::PROTOCOL_NAME, eth::ETH67),
            Capability::new(eth::PROTOCOL_NAME, eth::ETH66),
        ];
        if self.config.serve_snapshots || self.sync.mode() == SyncMode::SnapSync {
            capabilities.push(Capability::new(snap::PROTOCOL_NAME, snap::SNAP1));
        }
        capabilities
    }

    pub async fn handle_connection(
        self: &Arc<Self>,
        connection: Box<dyn Connection>,
    ) -> Result<PeerHandle, HandshakeError> {
        let remote_addr = connection.remote_addr();
        let local = LocalNode::new(
            self.config.node_id,
            self.config.client_id.clone(),
            self.local_capabilities(),
            &self.chain_config,
            self.sync.chain().current_head(),
        );

        let PeerConnection {
            id,
            client_id,
            status,
            eth,
            snap,
        } = handshake(connection, &local, self.config.handshake_timeout).await?;

        let peer = SyncPeer::new(
            id,
            eth.sender(),
            eth.version(),
            snap.as_ref().map(|snap| snap.sender()),
            &status,
        );
        if !self.sync.register_peer(peer) {
            eth.sender().disconnect(DisconnectReason::AlreadyConnected);
            return Err(HandshakeError::AlreadyConnected(id));
        }
        info!(
            peer = %id,
            client = %client_id,
            addr = ?remote_addr,
            eth = eth.version(),
            snap = snap.is_some(),
            "Peer connected"
        );

        let snap_task = snap.map(|snap| tokio::spawn(self.clone().snap_loop(id, snap)));
        let eth_loop = self.clone().eth_loop(id, eth);
        let task = tokio::spawn(async move {
            eth_loop.await;
            if let Some(snap_task) = snap_task
                && let Err(err) = snap_task.await
            {
                warn!(peer = %id, ?err, "Snap task failed");
            }
            info!(peer = %id, "Peer disconnected");
        });

        Ok(PeerHandle { id, task })
    }

    async fn eth_loop(self: Arc<Self>, peer: PeerId, mut eth: ProtocolStream<EthMessage>) {
        loop {
            let message = match eth.next_message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    warn!(peer = %peer, %err, "Malformed eth message");
                    self.sync.mark_disconnecting(&peer);
                    eth.sender().disconnect(DisconnectReason::ProtocolBreach);
                    break;
                }
            };
            if let Err(reason) = self.handle_eth(peer, &eth, message) {
                self.sync.mark_disconnecting(&peer);
                eth.sender().disconnect(reason);
                break;
            }
        }
        // a closed eth stream means the connection is gone
        self.sync.unregister_peer(&peer);
    }

    fn handle_eth(
        &self,
        peer: PeerId,
        eth: &ProtocolStream<EthMessage>,
        message: EthMessage,
    ) -> Result<(), DisconnectReason> {
        let chain = self.sync.chain().as_ref();
        let reply = match message {
            EthMessage::GetBlockHeaders(request) => {
                Some(EthMessage::BlockHeaders(serve::serve_headers(chain, &request)))
            }
            EthMessage::GetBlockBodies(request) => {
                Some(EthMessage::BlockBodies(serve::serve_bodies(chain, &request)))
            }
            EthMessage::GetReceipts(request) => {
                Some(EthMessage::Receipts(serve::serve_receipts(chain, &request)))
            }
            EthMessage::BlockHeaders(response) => {
                self.sync.deliver(
                    peer,
                    response.request_id,
                    FetchResponse::Headers(response.headers),
                );
                None
            }
            EthMessage::BlockBodies(response) => {
                self.sync.deliver(
                    peer,
                    response.request_id,
                    FetchResponse::Bodies(response.bodies),
                );
                None
            }
            EthMessage::Receipts(response) => {
                self.sync.deliver(
                    peer,
                    response.request_id,
                    FetchResponse::Receipts(response.receipts),
                );
                None
            }
            EthMessage::NewBlockHashes(announcement) => {
                if let Some(best) = announcement.best() {
                    self.sync.update_peer_head(
                        &peer,
                        best.hash,
                        best.number,
                        best.total_difficulty,
                    );
                }
                None
            }
            EthMessage::Status(_) => {
                warn!(peer = %peer, "Status received after handshake");
                return Err(DisconnectReason::ProtocolBreach);
            }
        };

        if let Some(reply) = reply
            && let Err(err) = eth.send(&reply)
        {
            debug!(peer = %peer, %err, "Reply not sent");
        }
        Ok(())
    }

    async fn snap_loop(self: Arc<Self>, peer: PeerId, mut snap: ProtocolStream<SnapMessage>) {
        loop {
            let message = match snap.next_message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    warn!(peer = %peer, %err, "Malformed snap message");
                    snap.sender().disconnect(DisconnectReason::ProtocolBreach);
                    break;
                }
            };
            match message {
                SnapMessage::GetAccountRange(request) => {
                    let response =
                        serve::serve_account_range(self.sync.chain().as_ref(), &request);
                    if let Err(err) = snap.send(&SnapMessage::AccountRange(response)) {
                        debug!(peer = %peer, %err, "Reply not sent");
                    }
                }
                SnapMessage::AccountRange(response) => {
                    self.sync.deliver(
                        peer,
                        response.request_id,
                        FetchResponse::AccountRange(response.range),
                    );
                }
            }
        }
    }
}
