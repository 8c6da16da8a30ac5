//! Peer wire adapter.
//!
//! A [`Connection`] carries length-delimited frames, each tagged with a message
//! code. The [`session`] layer runs the base protocol (hello, disconnect, ping)
//! and multiplexes the negotiated sub-protocols over one connection; the
//! [`handshake`] completes the `eth` status exchange on top of it.
pub mod codec;
pub mod conn;
pub mod eth;
pub mod handshake;
pub mod hello;
pub mod session;
pub mod snap;

pub use codec::{MAX_MESSAGE_SIZE, WireError};
pub use conn::{Connection, Frame, FrameReader, FrameWriter, MsgPipe, TcpConnection};
pub use eth::{EthMessage, HashOrNumber};
pub use handshake::{HandshakeError, LocalNode, PeerConnection, handshake};
pub use hello::{Capability, Hello};
pub use session::{ProtocolMessage, ProtocolSender, ProtocolStream, Session};
pub use self::snap::SnapMessage;
