//! Viewer transports
//!
//! A [`Viewer`] is the downstream half of a duplex connection: something
//! chunks can be sent to and whose closing can be observed. Two transports
//! are provided: an in-process channel and a raw TCP socket.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// A downstream consumer connection
///
/// `closed` is polled alongside the output feed and dropped whenever a
/// chunk arrives, so implementations must be cancel-safe.
pub trait Viewer: Send {
    /// Whether the connection still accepts data
    fn is_open(&self) -> bool;

    /// Send one chunk
    fn send(&mut self, data: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Resolve once the consumer side has closed
    fn closed(&mut self) -> impl Future<Output = ()> + Send;
}

/// Viewer backed by an mpsc channel
///
/// The consumer holds the receiving half; dropping it closes the viewer.
#[derive(Debug, Clone)]
pub struct ChannelViewer {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelViewer {
    /// Create a viewer and the receiver its chunks are delivered to
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Viewer for ChannelViewer {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.tx
            .send(data)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "viewer closed"))
    }

    async fn closed(&mut self) {
        self.tx.closed().await
    }
}

/// Viewer writing raw bytes to a TCP socket
///
/// Anything the peer sends is read and discarded; EOF or a read error
/// means the viewer has gone away.
#[derive(Debug)]
pub struct TcpViewer {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    peer_addr: SocketAddr,
    open: bool,
}

impl TcpViewer {
    /// Wrap an accepted socket
    pub fn new(socket: TcpStream, peer_addr: SocketAddr) -> Self {
        let (reader, writer) = socket.into_split();
        Self {
            reader,
            writer,
            peer_addr,
            open: true,
        }
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Viewer for TcpViewer {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        let result = self.writer.write_all(&data).await;
        if result.is_err() {
            self.open = false;
        }
        result
    }

    async fn closed(&mut self) {
        let mut scratch = [0u8; 512];
        loop {
            match self.reader.read(&mut scratch).await {
                Ok(0) | Err(_) => {
                    self.open = false;
                    return;
                }
                Ok(_) => {}
            }
        }
    }
}
