use std::fmt;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::serde_utils::quoted;

/// Stable identity of a remote node, taken from its hello message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PeerId(pub B256);

impl PeerId {
    pub fn new(id: B256) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(B256::from(rand::random::<[u8; 32]>()))
    }

    pub fn as_b256(&self) -> &B256 {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_slice();
        for byte in &bytes[..6] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

/// Peer connection state.
///
/// DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No active connection to this peer.
    Disconnected,
    /// Dial in progress or handshake not finished.
    Connecting,
    /// Handshake done, can exchange protocol messages.
    Connected,
    /// Disconnect sent, waiting for the connection to close.
    Disconnecting,
}

/// Reason codes carried by the base protocol disconnect message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum DisconnectReason {
    Requested = 0x00,
    TcpError = 0x01,
    ProtocolBreach = 0x02,
    UselessPeer = 0x03,
    TooManyPeers = 0x04,
    AlreadyConnected = 0x05,
    IncompatibleVersion = 0x06,
    ClientQuitting = 0x08,
    ConnectedToSelf = 0x0a,
    PingTimeout = 0x0b,
    /// Chain or network mismatch detected by a sub-protocol handshake.
    SubprotocolError = 0x10,
}

impl DisconnectReason {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x00 => Some(DisconnectReason::Requested),
            0x01 => Some(DisconnectReason::TcpError),
            0x02 => Some(DisconnectReason::ProtocolBreach),
            0x03 => Some(DisconnectReason::UselessPeer),
            0x04 => Some(DisconnectReason::TooManyPeers),
            0x05 => Some(DisconnectReason::AlreadyConnected),
            0x06 => Some(DisconnectReason::IncompatibleVersion),
            0x08 => Some(DisconnectReason::ClientQuitting),
            0x0a => Some(DisconnectReason::ConnectedToSelf),
            0x0b => Some(DisconnectReason::PingTimeout),
            0x10 => Some(DisconnectReason::SubprotocolError),
            _ => None,
        }
    }

    pub fn code(&self) -> u64 {
        *self as u64
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerCount {
    #[serde(with = "quoted")]
    pub disconnected: u64,
    #[serde(with = "quoted")]
    pub connecting: u64,
    #[serde(with = "quoted")]
    pub connected: u64,
    #[serde(with = "quoted")]
    pub disconnecting: u64,
}

impl PeerCount {
    pub fn new<'a>(states: impl IntoIterator<Item = &'a ConnectionState>) -> Self {
        let mut count = PeerCount::default();
        for state in states {
            match state {
                ConnectionState::Connected => count.connected += 1,
                ConnectionState::Connecting => count.connecting += 1,
                ConnectionState::Disconnected => count.disconnected += 1,
                ConnectionState::Disconnecting => count.disconnecting += 1,
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_codes_roundtrip() {
        for reason in [
            DisconnectReason::Requested,
            DisconnectReason::UselessPeer,
            DisconnectReason::SubprotocolError,
        ] {
            assert_eq!(DisconnectReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(DisconnectReason::from_code(0x42), None);
    }

    #[test]
    fn peer_count_serializes_quoted() {
        let states = [
            ConnectionState::Connected,
            ConnectionState::Connected,
            ConnectionState::Connecting,
        ];
        let count = PeerCount::new(&states);
        let json = serde_json::to_value(&count).unwrap();

        assert_eq!(json["connected"], "2");
        assert_eq!(json["connecting"], "1");
        assert_eq!(json["disconnected"], "0");
    }
}
