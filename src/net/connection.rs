//! Connection state and lifecycle tracking.
//!
//! # Responsibilities
//! - Own the raw byte stream of one accepted connection
//! - Expose buffered read/write views bound to that stream
//! - Snapshot accept-time facts (`ConnectionInfo`) for hooks and logs
//! - Count live connections for graceful shutdown
//!
//! # Transport States
//! ```text
//! Open ──take_handle──▶ Detached ──close──▶ Closed
//!   │                                          ▲
//!   └──────────────────close───────────────────┘
//! ```
//!
//! A connection is owned by exactly one task; nothing here is shared.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::io::{
    AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use uuid::Uuid;

use crate::config::Config;
use crate::hooks::Hooks;
use crate::net::server::Server;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Any bidirectional byte stream a connection can wrap.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased raw handle.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Buffered read view of a connection.
pub type ConnReader = BufReader<ReadHalf<BoxedStream>>;

/// Buffered write view of a connection.
pub type ConnWriter = BufWriter<WriteHalf<BoxedStream>>;

/// Immutable facts captured when a connection is accepted.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    /// Capture session identifier reported to hooks.
    pub session_id: Uuid,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub accepted_at: SystemTime,
    pub started: Instant,
    pub buffer_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl ConnectionInfo {
    pub fn new(
        id: ConnectionId,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        config: &Config,
    ) -> Self {
        Self {
            id,
            session_id: Uuid::new_v4(),
            local_addr,
            peer_addr,
            accepted_at: SystemTime::now(),
            started: Instant::now(),
            buffer_size: config.buffer_size,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        }
    }

    /// Time since the connection was accepted.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("valid socket address");
        Self::new(ConnectionId::new(), addr, addr, &Config::default())
    }
}

enum Transport {
    Open { reader: ConnReader, writer: ConnWriter },
    /// The raw stream was handed to a processor, which now owns its shutdown.
    Detached,
    Closed,
}

/// One accepted connection: raw stream, buffered views, and its server.
pub struct Connection {
    info: ConnectionInfo,
    server: Arc<Server>,
    hooks: Option<Hooks>,
    transport: Transport,
}

impl Connection {
    pub fn new<S>(stream: S, info: ConnectionInfo, server: Arc<Server>, hooks: Option<Hooks>) -> Self
    where
        S: AsyncStream + 'static,
    {
        let transport = open(Box::new(stream), info.buffer_size);
        Self {
            info,
            server,
            hooks,
            transport,
        }
    }

    /// Replace the underlying stream.
    ///
    /// Both buffered views are rebuilt on the new stream; anything still
    /// buffered for the old one is discarded along with it.
    pub fn set_handle<S>(&mut self, stream: S)
    where
        S: AsyncStream + 'static,
    {
        self.transport = open(Box::new(stream), self.info.buffer_size);
    }

    /// Detach the raw stream from this connection.
    ///
    /// Pending writes are flushed first. Returns the stream together with any
    /// bytes the reader had buffered but nobody consumed yet.
    pub async fn take_handle(&mut self) -> io::Result<(BoxedStream, Vec<u8>)> {
        match std::mem::replace(&mut self.transport, Transport::Detached) {
            Transport::Open { reader, mut writer } => {
                if let Err(e) = writer.flush().await {
                    self.transport = Transport::Closed;
                    return Err(e);
                }
                let leftover = reader.buffer().to_vec();
                let stream = reader.into_inner().unsplit(writer.into_inner());
                Ok((stream, leftover))
            }
            other => {
                self.transport = other;
                Err(not_connected())
            }
        }
    }

    pub fn reader(&mut self) -> io::Result<&mut ConnReader> {
        match &mut self.transport {
            Transport::Open { reader, .. } => Ok(reader),
            _ => Err(not_connected()),
        }
    }

    pub fn writer(&mut self) -> io::Result<&mut ConnWriter> {
        match &mut self.transport {
            Transport::Open { writer, .. } => Ok(writer),
            _ => Err(not_connected()),
        }
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn hooks(&self) -> Option<&Hooks> {
        self.hooks.as_ref()
    }

    /// Whether the buffered views are still attached.
    pub fn is_open(&self) -> bool {
        matches!(self.transport, Transport::Open { .. })
    }

    /// Flush the writer, then shut the stream down.
    ///
    /// A detached connection closes trivially. Closing twice returns
    /// `NotConnected`.
    pub async fn close(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Open { reader, mut writer } => {
                let flushed = writer.flush().await;
                let shutdown = writer.shutdown().await;
                drop(reader);
                flushed.and(shutdown)
            }
            Transport::Detached => Ok(()),
            Transport::Closed => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            )),
        }
    }
}

fn open(stream: BoxedStream, capacity: usize) -> Transport {
    let (read_half, write_half) = tokio::io::split(stream);
    Transport::Open {
        reader: BufReader::with_capacity(capacity, read_half),
        writer: BufWriter::with_capacity(capacity, write_half),
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection stream is not attached")
}

/// Tracks live connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tracked connection has finished.
    ///
    /// Never returns on its own if a connection hangs; callers bound it.
    pub async fn wait_idle(&self) {
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
