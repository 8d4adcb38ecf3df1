//! Listening endpoint and its connection registry.
//!
//! An [`Endpoint`] owns a TCP listener and every connection accepted from it.
//! Connections are registered under increasing IDs starting at 1 and leave
//! the registry when they close, whether on their own or through
//! [`Endpoint::close`].

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionConfig, ConnectionId};
use crate::error::{Result, TagwireError};
use crate::handler::DispatchTable;

/// Default cap on simultaneously open connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Pause after a failed accept so persistent errors (e.g. EMFILE) don't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Endpoint settings.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Applied to every accepted connection.
    pub connection: ConnectionConfig,
    /// The accept loop waits while this many connections are open.
    pub max_connections: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

struct EndpointInner {
    local_addr: SocketAddr,
    /// `None` once closed. Held for the whole run of the accept loop.
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    table: Arc<DispatchTable>,
    config: EndpointConfig,
    limit: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl EndpointInner {
    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A listening socket plus the connections accepted from it.
///
/// Cloning yields another handle to the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl Endpoint {
    /// Bind a listener on `addr`.
    ///
    /// Nothing is accepted until [`accept_loop`](Self::accept_loop) runs.
    pub async fn bind<A>(addr: A, table: Arc<DispatchTable>, config: EndpointConfig) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let label = addr.to_string();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TagwireError::Bind {
                addr: label.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TagwireError::Bind { addr: label, source })?;

        tracing::info!(addr = %local_addr, max_connections = config.max_connections, "listening");

        Ok(Self {
            inner: Arc::new(EndpointInner {
                local_addr,
                listener: tokio::sync::Mutex::new(Some(listener)),
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                limit: Arc::new(Semaphore::new(config.max_connections)),
                table,
                config,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Accept connections until the endpoint is closed.
    ///
    /// Accept errors are logged and the loop keeps going. Only one accept
    /// loop may run at a time: a concurrent call fails with
    /// `AcceptLoopRunning`, and a call after [`close`](Self::close) fails
    /// with `EndpointClosed`.
    pub async fn accept_loop(&self) -> Result<()> {
        let mut guard = self
            .inner
            .listener
            .try_lock()
            .map_err(|_| TagwireError::AcceptLoopRunning)?;
        let listener = guard.as_ref().ok_or(TagwireError::EndpointClosed)?;
        let shutdown = &self.inner.shutdown;

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = self.inner.limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                res = listener.accept() => res,
            };

            match accepted {
                Ok((stream, peer)) => self.register(stream, peer, permit),
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        // Drop the listening socket before `close` drains the registry
        guard.take();
        Ok(())
    }

    /// Run [`accept_loop`](Self::accept_loop) on a background task.
    pub fn spawn_accept_loop(&self) -> JoinHandle<Result<()>> {
        let endpoint = self.clone();
        tokio::spawn(async move { endpoint.accept_loop().await })
    }

    fn register(&self, stream: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Connection::accepted(
            id,
            stream,
            peer,
            self.inner.table.clone(),
            self.inner.config.connection.clone(),
        );
        self.inner.registry().insert(id, conn.clone());

        // Prune the entry and free the slot once the connection is gone
        let registry: Weak<EndpointInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            conn.closed().await;
            if let Some(inner) = registry.upgrade() {
                inner.registry().remove(&id);
            }
            drop(permit);
        });
    }

    /// Look up a live connection by ID.
    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.inner.registry().get(&id).cloned()
    }

    /// Snapshot of every registered connection.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.registry().values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop accepting, then close every registered connection and wait for
    /// each to finish.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) {
        let first = !self.inner.shutdown.is_cancelled();
        self.inner.shutdown.cancel();

        // Waits for a running accept loop to drop the listener
        drop(self.inner.listener.lock().await.take());

        let drained: Vec<Connection> = self
            .inner
            .registry()
            .drain()
            .map(|(_, conn)| conn)
            .collect();

        for conn in &drained {
            let _ = conn.close();
        }
        for conn in &drained {
            conn.closed().await;
        }

        if first {
            tracing::info!(
                addr = %self.inner.local_addr,
                closed_connections = drained.len(),
                "endpoint closed"
            );
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_addr", &self.inner.local_addr)
            .field("connections", &self.connection_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
