mod fetcher_tests;
mod service_tests;

use std::{sync::Arc, time::Duration};

use chain::{BasicValidator, BlockChain, ChainConfig, MemoryChain};
use containers::Status;
use metrics::Metrics;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

use crate::{
    serve,
    sync::{FetchResponse, SyncConfig, SyncMode, SyncPeer, SyncService},
    types::PeerId,
    wire::{
        EthMessage, ProtocolMessage, ProtocolSender, SnapMessage,
        eth::{self, PROTOCOL_LENGTH},
        hello::BASE_PROTOCOL_LENGTH,
        session::Outbound,
    },
};

pub(super) const ETH_OFFSET: u64 = BASE_PROTOCOL_LENGTH;
pub(super) const SNAP_OFFSET: u64 = BASE_PROTOCOL_LENGTH + PROTOCOL_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Behaviour {
    /// Answers every request from its chain.
    Serve,
    /// Reads requests and never answers.
    Silent,
    /// Answers header requests only.
    HeadersOnly,
    /// Answers headers, sends empty body lists and ignores receipt requests.
    EmptyBodies,
}

pub(super) fn status_of(chain: &MemoryChain) -> Status {
    let head = chain.current_head();
    Status {
        protocol_version: eth::ETH67 as u32,
        network_id: ChainConfig::devnet().network_id,
        total_difficulty: head.total_difficulty,
        head: head.hash,
        genesis: chain.genesis().hash(),
        fork_id: ChainConfig::devnet().fork_filter().fork_id(head.number),
    }
}

pub(super) fn detached_peer(
    snap: bool,
) -> (
    ProtocolSender<EthMessage>,
    UnboundedReceiver<Outbound>,
    Option<(ProtocolSender<SnapMessage>, UnboundedReceiver<Outbound>)>,
) {
    let (eth, eth_rx) = ProtocolSender::detached(ETH_OFFSET);
    let snap = snap.then(|| ProtocolSender::detached(SNAP_OFFSET));
    (eth, eth_rx, snap)
}

pub(super) fn service_with(
    local: MemoryChain,
    mode: SyncMode,
    config: SyncConfig,
) -> Arc<SyncService<MemoryChain>> {
    Arc::new(SyncService::new(
        Arc::new(local),
        Arc::new(BasicValidator),
        config,
        mode,
        Arc::new(Metrics::new()),
    ))
}

pub(super) fn empty_chain() -> MemoryChain {
    MemoryChain::from_config(&ChainConfig::devnet())
}

pub(super) fn seeded_chain(blocks: u64) -> Arc<MemoryChain> {
    Arc::new(MemoryChain::with_blocks(&ChainConfig::devnet(), blocks))
}

/// A registered peer backed by `chain`, answering through `SyncService::deliver`.
pub(super) struct MockPeer {
    pub id: PeerId,
    tasks: Vec<JoinHandle<()>>,
}

impl MockPeer {
    pub fn spawn<C: BlockChain>(
        service: &Arc<SyncService<C>>,
        chain: Arc<MemoryChain>,
        behaviour: Behaviour,
        snap: bool,
    ) -> Self {
        let id = PeerId::random();
        let (eth, eth_rx, snap) = detached_peer(snap);
        let (snap_sender, snap_rx) = snap.unzip();

        service.register_peer(SyncPeer::new(
            id,
            eth,
            eth::ETH67,
            snap_sender,
            &status_of(&chain),
        ));

        let mut tasks = vec![tokio::spawn(answer_eth(
            service.clone(),
            id,
            chain.clone(),
            behaviour,
            eth_rx,
        ))];
        if let Some(snap_rx) = snap_rx {
            tasks.push(tokio::spawn(answer_snap(
                service.clone(),
                id,
                chain,
                behaviour,
                snap_rx,
            )));
        }

        Self { id, tasks }
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn answer_eth<C: BlockChain>(
    service: Arc<SyncService<C>>,
    peer: PeerId,
    chain: Arc<MemoryChain>,
    behaviour: Behaviour,
    mut requests: UnboundedReceiver<Outbound>,
) {
    while let Some(Outbound::Frame(frame)) = requests.recv().await {
        if behaviour == Behaviour::Silent {
            continue;
        }
        let Ok(message) = EthMessage::decode_payload(frame.code - ETH_OFFSET, &frame.data) else {
            continue;
        };
        let (request_id, response) = match message {
            EthMessage::GetBlockHeaders(request) => {
                let response = serve::serve_headers(chain.as_ref(), &request);
                (response.request_id, FetchResponse::Headers(response.headers))
            }
            EthMessage::GetBlockBodies(request) if behaviour == Behaviour::EmptyBodies => {
                (request.request_id, FetchResponse::Bodies(Vec::new()))
            }
            EthMessage::GetBlockBodies(request) if behaviour == Behaviour::Serve => {
                let response = serve::serve_bodies(chain.as_ref(), &request);
                (response.request_id, FetchResponse::Bodies(response.bodies))
            }
            EthMessage::GetReceipts(request) if behaviour == Behaviour::Serve => {
                let response = serve::serve_receipts(chain.as_ref(), &request);
                (response.request_id, FetchResponse::Receipts(response.receipts))
            }
            _ => continue,
        };
        service.deliver(peer, request_id, response);
    }
}

async fn answer_snap<C: BlockChain>(
    service: Arc<SyncService<C>>,
    peer: PeerId,
    chain: Arc<MemoryChain>,
    behaviour: Behaviour,
    mut requests: UnboundedReceiver<Outbound>,
) {
    while let Some(Outbound::Frame(frame)) = requests.recv().await {
        if behaviour != Behaviour::Serve {
            continue;
        }
        if let Ok(SnapMessage::GetAccountRange(request)) =
            SnapMessage::decode_payload(frame.code - SNAP_OFFSET, &frame.data)
        {
            let response = serve::serve_account_range(chain.as_ref(), &request);
            service.deliver(
                peer,
                response.request_id,
                FetchResponse::AccountRange(response.range),
            );
        }
    }
}

/// Polls `condition` every few milliseconds, failing the test after five seconds.
pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
