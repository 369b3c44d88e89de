//! The unreliable byte channel underneath the protocol.
//!
//! [`Channel`] is the only I/O seam in the crate.  It promises nothing: bytes
//! handed to [`Channel::send`] may arrive corrupted, duplicated, or not at
//! all, and [`Channel::receive`] returns whatever has arrived so far without
//! regard for frame boundaries (possibly nothing).
//!
//! Two transports are provided:
//! - [`TcpChannel`] — a tokio `TcpStream`, used by the binary.
//! - [`MemoryChannel`] — an in-process pair joined by queues, used by tests.
//!
//! Faults are layered on top by [`crate::simulator::LossyChannel`].

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Read buffer size for one TCP read.
const READ_CHUNK: usize = 64 * 1024;
/// Client dial attempts before giving up on a server that is not up yet.
const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Underlying I/O error from the OS.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The remote end has gone away.
    #[error("channel closed by peer")]
    Closed,
}

// ---------------------------------------------------------------------------
// Channel trait
// ---------------------------------------------------------------------------

/// Which end of the connection this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    Client,
    Server,
}

/// A byte-oriented, unreliable, bidirectional transport.
#[async_trait]
pub trait Channel: Send {
    /// Fire-and-forget transmission of `bytes`.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Bytes that have arrived since the last call; may be empty when nothing
    /// arrived within the channel's poll interval.
    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError>;

    /// Tear down the transport.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;
}

#[async_trait]
impl<C: Channel + ?Sized> Channel for Box<C> {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        (**self).send(bytes).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        (**self).receive().await
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        (**self).disconnect().await
    }
}

// ---------------------------------------------------------------------------
// TcpChannel
// ---------------------------------------------------------------------------

/// A [`Channel`] over one TCP connection.
#[derive(Debug)]
pub struct TcpChannel {
    /// Address of the remote peer.
    pub peer_addr: SocketAddr,
    stream: TcpStream,
    poll_interval: Duration,
    read_buf: Vec<u8>,
}

impl TcpChannel {
    /// Open the channel in the given role.
    ///
    /// A client dials `address:port`, retrying briefly while the server comes
    /// up; a server binds `address:port` and accepts exactly one peer.
    pub async fn connect(
        role: Role,
        address: &str,
        port: u16,
        poll_interval: Duration,
    ) -> Result<Self, ChannelError> {
        match role {
            Role::Client => {
                let mut attempt = 1;
                loop {
                    match TcpStream::connect((address, port)).await {
                        Ok(stream) => return Self::from_stream(stream, poll_interval),
                        Err(e) if attempt < CONNECT_ATTEMPTS => {
                            log::debug!("[chan] connect attempt {attempt} failed: {e}");
                            attempt += 1;
                            tokio::time::sleep(CONNECT_BACKOFF).await;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Role::Server => {
                let listener = TcpListener::bind((address, port)).await?;
                log::info!("[chan] listening on {}", listener.local_addr()?);
                Self::accept(&listener, poll_interval).await
            }
        }
    }

    /// Accept a single peer on an already bound listener.
    pub async fn accept(listener: &TcpListener, poll_interval: Duration) -> Result<Self, ChannelError> {
        let (stream, _) = listener.accept().await?;
        Self::from_stream(stream, poll_interval)
    }

    pub fn from_stream(stream: TcpStream, poll_interval: Duration) -> Result<Self, ChannelError> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        log::debug!("[chan] connected to {peer_addr}");
        Ok(Self {
            peer_addr,
            stream,
            poll_interval,
            read_buf: vec![0u8; READ_CHUNK],
        })
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        match timeout(self.poll_interval, self.stream.read(&mut self.read_buf)).await {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(ChannelError::Closed),
            Ok(Ok(n)) => Ok(self.read_buf[..n].to_vec()),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// One end of an in-process channel pair.
///
/// Writes are queued for the other end.  Reads return at most `max_read`
/// bytes, so a frame can be cut across several reads and several frames can
/// arrive in one.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: BytesMut,
    max_read: usize,
    poll_interval: Duration,
}

impl MemoryChannel {
    /// Two connected ends.
    pub fn pair(poll_interval: Duration) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self::new(a_tx, a_rx, poll_interval),
            Self::new(b_tx, b_rx, poll_interval),
        )
    }

    fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tx: Some(tx),
            rx,
            pending: BytesMut::new(),
            max_read: usize::MAX,
            poll_interval,
        }
    }

    /// Cap every read at `max_read` bytes.
    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    fn drain_queued(&mut self) {
        while let Ok(chunk) = self.rx.try_recv() {
            self.pending.extend_from_slice(&chunk);
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        if tx.send(bytes.to_vec()).is_err() {
            // Fire-and-forget: bytes sent to a vanished peer are simply lost.
            log::trace!("[chan] peer gone; dropped {} bytes", bytes.len());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        if self.pending.is_empty() {
            match timeout(self.poll_interval, self.rx.recv()).await {
                Err(_elapsed) => return Ok(Vec::new()),
                Ok(None) => return Err(ChannelError::Closed),
                Ok(Some(chunk)) => self.pending.extend_from_slice(&chunk),
            }
        }
        self.drain_queued();

        let n = self.pending.len().min(self.max_read);
        Ok(self.pending.split_to(n).to_vec())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.tx = None;
        Ok(())
    }
}
