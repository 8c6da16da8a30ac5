use std::time::Duration;

use alloy_primitives::B256;
use chain::{ChainConfig, ForkFilter, ForkIdError};
use containers::{ChainHead, Status};
use thiserror::Error;
use tracing::debug;

use super::{
    codec::WireError,
    conn::Connection,
    eth::{self, EthMessage},
    hello::{BASE_PROTOCOL_VERSION, Capability, Hello},
    session::{ProtocolStream, Session},
    snap::{self, SnapMessage},
};
use crate::types::{DisconnectReason, PeerId};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("handshake timed out")]
    Timeout,
    #[error("no shared eth protocol")]
    NoSharedProtocol,
    #[error("network id mismatch: local {local}, remote {remote}")]
    NetworkMismatch { local: u64, remote: u64 },
    #[error("genesis mismatch: local {local}, remote {remote}")]
    GenesisMismatch { local: B256, remote: B256 },
    #[error("status version {remote} differs from negotiated eth/{negotiated}")]
    VersionMismatch { negotiated: u64, remote: u64 },
    #[error("fork id rejected: {0}")]
    ForkId(#[from] ForkIdError),
    #[error("peer {0} is already connected")]
    AlreadyConnected(PeerId),
    #[error("connected to self")]
    SelfConnection,
}

impl HandshakeError {
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            HandshakeError::Wire(_) => DisconnectReason::ProtocolBreach,
            HandshakeError::Timeout => DisconnectReason::PingTimeout,
            HandshakeError::NoSharedProtocol => DisconnectReason::UselessPeer,
            HandshakeError::VersionMismatch { .. } => DisconnectReason::IncompatibleVersion,
            HandshakeError::NetworkMismatch { .. }
            | HandshakeError::GenesisMismatch { .. }
            | HandshakeError::ForkId(_) => DisconnectReason::SubprotocolError,
            HandshakeError::AlreadyConnected(_) => DisconnectReason::AlreadyConnected,
            HandshakeError::SelfConnection => DisconnectReason::ConnectedToSelf,
        }
    }
}

/// What this node presents during a handshake, captured at connection time.
#[derive(Clone, Debug)]
pub struct LocalNode {
    pub node_id: PeerId,
    pub client_id: String,
    pub capabilities: Vec<Capability>,
    /// `protocol_version` is replaced by the negotiated eth version.
    pub status: Status,
    pub fork_filter: ForkFilter,
    pub head_number: u64,
}

impl LocalNode {
    pub fn new(
        node_id: PeerId,
        client_id: String,
        capabilities: Vec<Capability>,
        config: &ChainConfig,
        head: ChainHead,
    ) -> Self {
        let fork_filter = config.fork_filter();
        let status = Status {
            protocol_version: 0,
            network_id: config.network_id,
            total_difficulty: head.total_difficulty,
            head: head.hash,
            genesis: config.genesis.hash(),
            fork_id: fork_filter.fork_id(head.number),
        };
        Self {
            node_id,
            client_id,
            capabilities,
            status,
            fork_filter,
            head_number: head.number,
        }
    }
}

/// A peer that completed the handshake.
pub struct PeerConnection {
    pub id: PeerId,
    pub client_id: String,
    pub status: Status,
    pub eth: ProtocolStream<EthMessage>,
    pub snap: Option<ProtocolStream<SnapMessage>>,
}

pub async fn handshake(
    connection: Box<dyn Connection>,
    local: &LocalNode,
    timeout: Duration,
) -> Result<PeerConnection, HandshakeError> {
    match tokio::time::timeout(timeout, exchange(connection, local)).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

async fn exchange(
    connection: Box<dyn Connection>,
    local: &LocalNode,
) -> Result<PeerConnection, HandshakeError> {
    let hello = Hello {
        protocol_version: BASE_PROTOCOL_VERSION,
        client_id: local.client_id.clone(),
        capabilities: local.capabilities.clone(),
        node_id: local.node_id.0,
    };
    let mut session = Session::establish(connection, &hello).await?;

    let id = PeerId::new(session.remote().node_id);
    if id == local.node_id {
        session.disconnect(DisconnectReason::ConnectedToSelf);
        return Err(HandshakeError::SelfConnection);
    }

    let Some(mut eth) = session.take_stream::<EthMessage>(eth::PROTOCOL_NAME) else {
        session.disconnect(DisconnectReason::UselessPeer);
        return Err(HandshakeError::NoSharedProtocol);
    };
    let snap = session.take_stream::<SnapMessage>(snap::PROTOCOL_NAME);
    let client_id = session.remote().client_id.clone();

    let mut status = local.status.clone();
    status.protocol_version = eth.version() as u32;
    eth.send(&EthMessage::Status(status))?;

    let remote = match eth.next_message().await {
        Ok(Some(EthMessage::Status(status))) => status,
        Ok(Some(_)) => {
            return Err(reject(
                &eth,
                WireError::Unexpected("first eth message must be status").into(),
            ));
        }
        Ok(None) => return Err(WireError::Closed.into()),
        Err(err) => return Err(reject(&eth, err.into())),
    };

    if let Err(err) = validate_status(local, &remote, eth.version()) {
        return Err(reject(&eth, err));
    }

    debug!(
        peer = %id,
        client = %client_id,
        eth = eth.version(),
        snap = snap.is_some(),
        "Handshake complete"
    );

    Ok(PeerConnection {
        id,
        client_id,
        status: remote,
        eth,
        snap,
    })
}

fn reject(eth: &ProtocolStream<EthMessage>, err: HandshakeError) -> HandshakeError {
    eth.sender().disconnect(err.disconnect_reason());
    err
}

fn validate_status(local: &LocalNode, remote: &Status, negotiated: u64) -> Result<(), HandshakeError> {
    if remote.network_id != local.status.network_id {
        return Err(HandshakeError::NetworkMismatch {
            local: local.status.network_id,
            remote: remote.network_id,
        });
    }
    if remote.genesis != local.status.genesis {
        return Err(HandshakeError::GenesisMismatch {
            local: local.status.genesis,
            remote: remote.genesis,
        });
    }
    if u64::from(remote.protocol_version) != negotiated {
        return Err(HandshakeError::VersionMismatch {
            negotiated,
            remote: remote.protocol_version.into(),
        });
    }
    local
        .fork_filter
        .validate(&remote.fork_id, local.head_number)?;
    Ok(())
}
