use std::{collections::HashMap, fmt, marker::PhantomData};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    codec::{self, WireError},
    conn::{Connection, Frame, FrameReader, FrameWriter},
    hello::{
        BASE_PROTOCOL_LENGTH, DISCONNECT, Disconnect, HELLO, Hello, PING, PONG, SharedCapability,
        match_capabilities,
    },
};
use crate::types::DisconnectReason;

/// A sub-protocol message set addressed by codes relative to its offset.
pub trait ProtocolMessage: Sized + Send + 'static {
    fn code(&self) -> u64;

    fn name(&self) -> &'static str;

    fn encode_payload(&self) -> Result<Vec<u8>, WireError>;

    fn decode_payload(code: u64, data: &[u8]) -> Result<Self, WireError>;
}

/// Work item for a session's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(Frame),
    Disconnect(DisconnectReason),
}

/// Cloneable send half of one sub-protocol on one connection.
pub struct ProtocolSender<M> {
    offset: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    _marker: PhantomData<fn(M)>,
}

impl<M> Clone for ProtocolSender<M> {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            outbound: self.outbound.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M> fmt::Debug for ProtocolSender<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSender")
            .field("offset", &self.offset)
            .field("closed", &self.outbound.is_closed())
            .finish()
    }
}

impl<M: ProtocolMessage> ProtocolSender<M> {
    fn new(offset: u64, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            offset,
            outbound,
            _marker: PhantomData,
        }
    }

    /// Sender whose frames land in the returned receiver instead of a connection.
    pub fn detached(offset: u64) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(offset, tx), rx)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn send(&self, message: &M) -> Result<(), WireError> {
        let data = message.encode_payload()?;
        let frame = Frame::new(self.offset + message.code(), data);
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| WireError::Closed)
    }

    /// Sends a disconnect and tears the connection down once it is written.
    pub fn disconnect(&self, reason: DisconnectReason) {
        if self.outbound.send(Outbound::Disconnect(reason)).is_err() {
            trace!(?reason, "Connection already closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Both halves of one negotiated sub-protocol.
pub struct ProtocolStream<M> {
    version: u64,
    sender: ProtocolSender<M>,
    inbound: mpsc::UnboundedReceiver<Frame>,
}

impl<M: ProtocolMessage> ProtocolStream<M> {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sender(&self) -> ProtocolSender<M> {
        self.sender.clone()
    }

    pub fn send(&self, message: &M) -> Result<(), WireError> {
        self.sender.send(message)
    }

    /// Waits for the next message. `Ok(None)` once the connection is closed.
    pub async fn next_message(&mut self) -> Result<Option<M>, WireError> {
        match self.inbound.recv().await {
            Some(frame) => M::decode_payload(frame.code, &frame.data).map(Some),
            None => Ok(None),
        }
    }
}

/// A connection past the hello exchange, with reader and writer tasks running.
pub struct Session {
    remote: Hello,
    shared: Vec<SharedCapability>,
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: HashMap<String, mpsc::UnboundedReceiver<Frame>>,
}

impl Session {
    pub async fn establish(connection: Box<dyn Connection>, local: &Hello) -> Result<Self, WireError> {
        let (mut reader, mut writer) = connection.split();

        writer
            .write_frame(Frame::new(HELLO, codec::encode(local)?))
            .await?;

        let remote = match reader.read_frame().await? {
            Some(frame) if frame.code == HELLO => codec::decode::<Hello>(&frame.data)?,
            Some(frame) if frame.code == DISCONNECT => {
                return Err(WireError::Disconnected(disconnect_reason(&frame.data)));
            }
            Some(_) => return Err(WireError::Unexpected("first message must be hello")),
            None => return Err(WireError::Closed),
        };

        let shared = match_capabilities(&local.capabilities, &remote.capabilities);
        debug!(
            client = %remote.client_id,
            shared = ?shared.iter().map(|cap| format!("{}/{}", cap.name, cap.version)).collect::<Vec<_>>(),
            "Hello exchanged"
        );

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let mut inbound = HashMap::new();
        let mut routes = Vec::with_capacity(shared.len());
        for cap in &shared {
            let (tx, rx) = mpsc::unbounded_channel();
            inbound.insert(cap.name.clone(), rx);
            routes.push((cap.clone(), tx));
        }

        let closed = CancellationToken::new();
        tokio::spawn(write_loop(writer, outbound_rx, closed.clone()));
        tokio::spawn(read_loop(reader, routes, outbound.downgrade(), closed));

        Ok(Self {
            remote,
            shared,
            outbound,
            inbound,
        })
    }

    pub fn remote(&self) -> &Hello {
        &self.remote
    }

    pub fn shared(&self) -> &[SharedCapability] {
        &self.shared
    }

    /// Hands out the stream of a shared protocol. Each protocol can be taken once.
    pub fn take_stream<M: ProtocolMessage>(&mut self, name: &str) -> Option<ProtocolStream<M>> {
        let cap = self.shared.iter().find(|cap| cap.name == name)?;
        let inbound = self.inbound.remove(name)?;
        Some(ProtocolStream {
            version: cap.version,
            sender: ProtocolSender::new(cap.offset, self.outbound.clone()),
            inbound,
        })
    }

    pub fn disconnect(&self, reason: DisconnectReason) {
        let _ = self.outbound.send(Outbound::Disconnect(reason));
    }
}

fn disconnect_reason(data: &[u8]) -> DisconnectReason {
    codec::decode::<Disconnect>(data)
        .ok()
        .and_then(|msg| DisconnectReason::from_code(msg.reason))
        .unwrap_or(DisconnectReason::Requested)
}

fn empty_list() -> Vec<u8> {
    codec::encode(&Vec::<u64>::new()).unwrap_or_default()
}

async fn read_loop(
    mut reader: Box<dyn FrameReader>,
    routes: Vec<(SharedCapability, mpsc::UnboundedSender<Frame>)>,
    outbound: mpsc::WeakUnboundedSender<Outbound>,
    closed: CancellationToken,
) {
    let reply = |message: Outbound| {
        if let Some(tx) = outbound.upgrade() {
            let _ = tx.send(message);
        }
    };

    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = reader.read_frame() => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "Read failed");
                break;
            }
        };

        match frame.code {
            PING => reply(Outbound::Frame(Frame::new(PONG, empty_list()))),
            PONG => {}
            DISCONNECT => {
                debug!(reason = ?disconnect_reason(&frame.data), "Peer disconnected");
                break;
            }
            code if code < BASE_PROTOCOL_LENGTH => {
                warn!(code, "Unexpected base protocol message");
                reply(Outbound::Disconnect(DisconnectReason::ProtocolBreach));
                break;
            }
            code => match routes.iter().find(|(cap, _)| cap.contains(code)) {
                Some((cap, tx)) => {
                    // receiver may be gone if the protocol was never taken
                    let _ = tx.send(Frame::new(code - cap.offset, frame.data));
                }
                None => {
                    warn!(code, "Message outside negotiated protocols");
                    reply(Outbound::Disconnect(DisconnectReason::ProtocolBreach));
                    break;
                }
            },
        }
    }

    closed.cancel();
}

async fn write_loop(
    mut writer: Box<dyn FrameWriter>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            next = outbound.recv() => next,
            _ = closed.cancelled() => None,
        };

        match next {
            Some(Outbound::Frame(frame)) => {
                if let Err(err) = writer.write_frame(frame).await {
                    debug!(%err, "Write failed");
                    break;
                }
            }
            Some(Outbound::Disconnect(reason)) => {
                let data = codec::encode(&Disconnect {
                    reason: reason.code(),
                })
                .unwrap_or_default();
                if let Err(err) = writer.write_frame(Frame::new(DISCONNECT, data)).await {
                    trace!(%err, "Disconnect not delivered");
                }
                break;
            }
            None => break,
        }
    }

    let _ = writer.close().await;
    closed.cancel();
}
