use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};

use super::codec::{MAX_MESSAGE_SIZE, WireError};

/// One message on the wire: absolute message code plus compressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u64,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(code: u64, data: Vec<u8>) -> Self {
        Self { code, data }
    }
}

#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or `None` once the remote side closed the connection.
    async fn read_frame(&mut self) -> Result<Option<Frame>, WireError>;
}

#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), WireError>;

    async fn close(&mut self) -> Result<(), WireError>;
}

/// A duplex frame transport owned by exactly one peer session.
pub trait Connection: Send + 'static {
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// In-memory connection; [`MsgPipe::pair`] returns both ends.
#[derive(Debug)]
pub struct MsgPipe {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MsgPipe {
    pub fn pair() -> (MsgPipe, MsgPipe) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (MsgPipe { tx: a_tx, rx: b_rx }, MsgPipe { tx: b_tx, rx: a_rx })
    }
}

struct PipeReader(mpsc::UnboundedReceiver<Frame>);

struct PipeWriter(Option<mpsc::UnboundedSender<Frame>>);

#[async_trait]
impl FrameReader for PipeReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>, WireError> {
        Ok(self.0.recv().await)
    }
}

#[async_trait]
impl FrameWriter for PipeWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), WireError> {
        let tx = self.0.as_ref().ok_or(WireError::Closed)?;
        tx.send(frame).map_err(|_| WireError::Closed)
    }

    async fn close(&mut self) -> Result<(), WireError> {
        self.0 = None;
        Ok(())
    }
}

impl Connection for MsgPipe {
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let MsgPipe { tx, rx } = *self;
        (Box::new(PipeReader(rx)), Box::new(PipeWriter(Some(tx))))
    }
}

/// Frames over TCP: `u32` big-endian length of what follows, `u64` code, payload.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    addr: SocketAddr,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self { stream, addr }
    }
}

const CODE_LEN: usize = 8;

struct TcpReader(BufReader<OwnedReadHalf>);

struct TcpWriter(BufWriter<OwnedWriteHalf>);

#[async_trait]
impl FrameReader for TcpReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>, WireError> {
        let len = match self.0.read_u32().await {
            Ok(len) => len as usize,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        // compressed payloads never exceed the decompressed limit by much
        if len < CODE_LEN || len > MAX_MESSAGE_SIZE + CODE_LEN {
            return Err(WireError::Oversize(len));
        }

        let code = self.0.read_u64().await?;
        let mut data = vec![0u8; len - CODE_LEN];
        self.0.read_exact(&mut data).await?;

        Ok(Some(Frame { code, data }))
    }
}

#[async_trait]
impl FrameWriter for TcpWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), WireError> {
        let len = frame.data.len() + CODE_LEN;
        let len = u32::try_from(len).map_err(|_| WireError::Oversize(len))?;

        self.0.write_u32(len).await?;
        self.0.write_u64(frame.code).await?;
        self.0.write_all(&frame.data).await?;
        self.0.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WireError> {
        self.0.shutdown().await?;
        Ok(())
    }
}

impl Connection for TcpConnection {
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (read, write) = self.stream.into_split();
        (
            Box::new(TcpReader(BufReader::new(read))),
            Box::new(TcpWriter(BufWriter::new(write))),
        )
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }
}
