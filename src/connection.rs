//! A single framed TCP connection.
//!
//! Each connection owns its socket through two tasks:
//!
//! ```text
//!            ┌──────────── read task ─────────────┐
//! socket ──► │ read_frame → termination? → table  │ ──► handlers (inline)
//!            └────────────────────────────────────┘
//!            ┌──────────── write task ────────────┐
//! send() ──► │ queue → batch → write_vectored     │ ──► socket
//!            └────────────────────────────────────┘
//! ```
//!
//! Both tasks watch one [`CancellationToken`]. `close()`, or dropping the last
//! [`Connection`] clone, cancels it exactly once; the state becomes `Closed`
//! after both tasks have exited.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::de::IgnoredAny;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::{Result, TagwireError};
use crate::handler::{DispatchTable, MessageContext};
use crate::protocol::{read_frame, Message, Tag, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::writer::{writer_channel, writer_loop, OutboundFrame, WriterConfig, WriterHandle};

/// Identifier assigned by an [`Endpoint`](crate::Endpoint) registry.
///
/// Dialed connections are not registered anywhere and carry ID 0.
pub type ConnectionId = u64;

/// Tag of the client "offline" notice, reserved by default.
pub const DEFAULT_TERMINATION_TAG: Tag = 2;

/// What the read task does with a termination frame.
///
/// A matching frame's payload is decoded as JSON for the log only. A payload
/// that does not decode is logged at `warn`; the connection closes either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// Frames with this tag close the connection and are never dispatched.
    Tag(Tag),
    /// Every frame goes to the dispatch table.
    Disabled,
}

impl TerminationPolicy {
    fn matches(&self, tag: Tag) -> bool {
        matches!(self, TerminationPolicy::Tag(t) if *t == tag)
    }
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        TerminationPolicy::Tag(DEFAULT_TERMINATION_TAG)
    }
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outbound queue capacity. 0 makes every send wait for the write task.
    pub queue_capacity: usize,
    /// Largest payload the read task accepts.
    pub max_payload_size: u32,
    /// Close the connection after this long without an inbound frame.
    pub idle_timeout: Option<Duration>,
    /// Reserved termination tag handling.
    pub termination: TerminationPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::writer::DEFAULT_QUEUE_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            idle_timeout: None,
            termination: TerminationPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            queue_capacity: self.queue_capacity,
        }
    }
}

/// Lifecycle of a connection. Moves only forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Both tasks running; sends accepted.
    Open,
    /// `close()` has been called; tasks are winding down.
    Closing,
    /// Both tasks have exited.
    Closed,
}

/// State shared by the user-facing handles and the connection's tasks.
struct Shared {
    id: ConnectionId,
    peer: String,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    /// Read and write tasks still running.
    live_tasks: AtomicUsize,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn close(&self) -> Result<()> {
        let first = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Open {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
        if !first {
            return Err(TagwireError::AlreadyClosed);
        }

        self.shutdown.cancel();
        Ok(())
    }

    fn task_exited(&self) {
        if self.live_tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.send_replace(ConnectionState::Closed);
            tracing::debug!(id = self.id, peer = %self.peer, "connection closed");
        }
    }
}

/// Owns the sending side of the outbound queue.
///
/// The tasks only hold a `Weak` to this, so dropping the last `Connection`
/// clone closes the connection.
struct Handle {
    shared: Arc<Shared>,
    writer: WriterHandle,
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.shared.close().is_ok() {
            tracing::debug!(id = self.shared.id, peer = %self.shared.peer, "last handle dropped, closing");
        }
    }
}

/// Handle to a running connection.
///
/// Cheap to clone; every clone refers to the same socket and tasks. When the
/// last clone is dropped the connection is closed as if by [`close()`](Self::close).
/// Handlers receive a clone through their [`MessageContext`] for the duration
/// of the call.
#[derive(Clone)]
pub struct Connection {
    handle: Arc<Handle>,
}

impl Connection {
    /// Connect to `addr` and start the connection's tasks.
    pub async fn dial<A>(addr: A, table: Arc<DispatchTable>, config: ConnectionConfig) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let label = addr.to_string();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TagwireError::Dial {
                addr: label.clone(),
                source,
            })?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or(label);

        Ok(Self::from_tcp(0, stream, peer, table, config))
    }

    /// Wrap an accepted socket.
    pub(crate) fn accepted(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        table: Arc<DispatchTable>,
        config: ConnectionConfig,
    ) -> Self {
        Self::from_tcp(id, stream, peer.to_string(), table, config)
    }

    fn from_tcp(
        id: ConnectionId,
        stream: TcpStream,
        peer: String,
        table: Arc<DispatchTable>,
        config: ConnectionConfig,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "could not set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        Self::start(id, peer, reader, writer, table, config)
    }

    /// Run a connection over any bidirectional byte stream.
    ///
    /// `peer` is only used for logging and [`peer()`](Self::peer).
    pub fn from_io<S>(
        io: S,
        peer: impl Into<String>,
        table: Arc<DispatchTable>,
        config: ConnectionConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self::start(0, peer.into(), reader, writer, table, config)
    }

    fn start<R, W>(
        id: ConnectionId,
        peer: String,
        reader: R,
        writer: W,
        table: Arc<DispatchTable>,
        config: ConnectionConfig,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_handle, queue) = writer_channel(&config.writer_config());
        let (state, _) = watch::channel(ConnectionState::Open);
        let shared = Arc::new(Shared {
            id,
            peer,
            state,
            shutdown: CancellationToken::new(),
            live_tasks: AtomicUsize::new(2),
        });
        let conn = Self {
            handle: Arc::new(Handle {
                shared: shared.clone(),
                writer: writer_handle,
            }),
        };

        let write_shared = shared.clone();
        tokio::spawn(async move {
            let shutdown = write_shared.shutdown.clone();
            if let Err(e) = writer_loop(queue, writer, shutdown).await {
                tracing::warn!(id = write_shared.id, peer = %write_shared.peer, error = %e, "write failed");
            }
            let _ = write_shared.close();
            write_shared.task_exited();
        });

        let read_shared = shared;
        let handle = Arc::downgrade(&conn.handle);
        tokio::spawn(async move {
            let shutdown = read_shared.shutdown.clone();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {}
                res = read_loop(&read_shared, &handle, reader, &table, &config) => {
                    if let Err(e) = res {
                        tracing::warn!(id = read_shared.id, peer = %read_shared.peer, error = %e, "read failed");
                    }
                }
            }
            let _ = read_shared.close();
            read_shared.task_exited();
        });

        tracing::debug!(id = conn.id(), peer = %conn.peer(), "connection opened");
        conn
    }

    fn shared(&self) -> &Shared {
        &self.handle.shared
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == ConnectionState::Open {
            Ok(())
        } else {
            Err(TagwireError::ConnectionClosed)
        }
    }

    /// Send a JSON-encoded message.
    ///
    /// With an unbuffered queue this returns once the write task has taken
    /// the frame; with a buffered queue once it is queued.
    pub async fn send<M: Message + ?Sized>(&self, message: &M) -> Result<()> {
        self.send_with::<JsonCodec, M>(message).await
    }

    /// Send a message encoded with codec `C`.
    pub async fn send_with<C, M>(&self, message: &M) -> Result<()>
    where
        C: PayloadCodec,
        M: Message + ?Sized,
    {
        self.ensure_open()?;
        let frame = OutboundFrame::encode::<C, M>(message)?;
        self.handle.writer.send(frame).await
    }

    /// Send a pre-encoded payload under `tag`.
    pub async fn send_frame(&self, tag: Tag, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        let frame = OutboundFrame::with_payload(tag, payload)?;
        self.handle.writer.send(frame).await
    }

    /// Wait until everything sent so far has been written and flushed.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.handle.writer.flush().await
    }

    /// Close the connection.
    ///
    /// Only the first call has an effect; later calls return `AlreadyClosed`.
    /// Queued frames that were not yet written are discarded.
    pub fn close(&self) -> Result<()> {
        self.shared().close()
    }

    /// Flush queued frames, then close.
    pub async fn close_gracefully(&self) -> Result<()> {
        self.flush().await?;
        self.close()
    }

    /// Resolves once both tasks have exited.
    pub async fn closed(&self) {
        let mut state = self.shared().state.subscribe();
        // The sender lives as long as `self`, so this only returns on Closed
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared().state()
    }

    /// Whether the connection still accepts sends.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Remote address.
    pub fn peer(&self) -> &str {
        &self.shared().peer
    }

    /// Registry ID, or 0 for dialed connections.
    pub fn id(&self) -> ConnectionId {
        self.shared().id
    }
}

/// Read frames and dispatch them until EOF, error, idle timeout, a
/// termination frame, or every handle being dropped.
async fn read_loop<R>(
    shared: &Shared,
    handle: &Weak<Handle>,
    mut reader: R,
    table: &DispatchTable,
    config: &ConnectionConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = match config.idle_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, read_frame(&mut reader, config.max_payload_size)).await {
                    Ok(res) => res?,
                    Err(_) => {
                        tracing::debug!(id = shared.id, peer = %shared.peer, idle = ?limit, "idle timeout");
                        return Ok(());
                    }
                }
            }
            None => read_frame(&mut reader, config.max_payload_size).await?,
        };

        let Some(frame) = next else {
            tracing::debug!(id = shared.id, peer = %shared.peer, "peer closed the connection");
            return Ok(());
        };

        let tag = frame.tag();
        if config.termination.matches(tag) {
            // The payload only matters to the log
            match JsonCodec::decode::<IgnoredAny>(frame.payload()) {
                Ok(_) => tracing::debug!(
                    id = shared.id,
                    peer = %shared.peer,
                    tag,
                    len = frame.payload_len(),
                    "termination frame received"
                ),
                Err(e) => tracing::warn!(
                    id = shared.id,
                    peer = %shared.peer,
                    tag,
                    error = %e,
                    "termination payload decode failed, closing anyway"
                ),
            }
            return Ok(());
        }

        let Some(handle) = handle.upgrade() else {
            return Ok(());
        };
        let ctx = MessageContext::new(tag, Connection { handle });
        match table.dispatch(tag, frame.payload, ctx).await {
            Ok(()) => {}
            Err(TagwireError::HandlerNotFound(_)) => {
                tracing::warn!(peer = %shared.peer, tag, "no handler registered, frame dropped");
            }
            Err(e) if e.is_codec() => {
                tracing::warn!(peer = %shared.peer, tag, error = %e, "payload decode failed, frame dropped");
            }
            Err(e) => {
                tracing::warn!(peer = %shared.peer, tag, error = %e, "handler failed");
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer", &self.peer())
            .field("state", &self.state())
            .finish()
    }
}
