//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state
//!   (Connecting → Handshaking → Routing → Proxying | Serving → Closed)
//! - Generate unique connection IDs for tracing
//! - Serve HTTP/1.1 and HTTP/2 on a (possibly decrypted) stream
//! - Coordinate graceful shutdown per-connection

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tower::ServiceExt;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough; only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
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

/// Connection state for lifecycle tracking.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, nothing read yet.
    Connecting = 0,
    /// TLS negotiation in progress.
    Handshaking = 1,
    /// A request is being classified.
    Routing = 2,
    /// A request is being forwarded upstream.
    Proxying = 3,
    /// A request is being answered from the build cache or live channel.
    Serving = 4,
    /// Connection is closed.
    Closed = 5,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Routing,
            3 => ConnectionState::Proxying,
            4 => ConnectionState::Serving,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared, cheaply clonable view of one connection's state.
///
/// Handed to request handlers through request extensions.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    id: ConnectionId,
    state: Arc<AtomicU8>,
}

impl ConnectionStatus {
    fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            state: Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load(Ordering::Relaxed).into()
    }

    /// Move to `next`. A closed connection stays closed.
    pub fn transition(&self, next: ConnectionState) {
        let prev: ConnectionState = self.state.load(Ordering::Relaxed).into();
        if prev == ConnectionState::Closed {
            return;
        }
        self.state.store(next as u8, Ordering::Relaxed);
        tracing::trace!(connection_id = %self.id, from = ?prev, to = ?next, "Connection state");
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            status: ConnectionStatus::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `timeout` elapses.
    ///
    /// Returns true if every connection closed in time.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Marks the connection closed and decrements the active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    status: ConnectionStatus,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.status.id
    }

    /// Shared status handle for this connection.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.status.transition(ConnectionState::Closed);
        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serve HTTP on an established stream until the client goes away or a
/// shutdown is signalled.
///
/// Every request carries the peer address (`ConnectInfo<SocketAddr>`) and
/// the connection's [`ConnectionStatus`] in its extensions. Dropping the
/// connection drops in-flight handler futures, which cancels any upstream
/// forward they were running.
pub async fn serve_connection<I>(
    io: I,
    peer: SocketAddr,
    app: Router,
    status: ConnectionStatus,
    mut shutdown: broadcast::Receiver<()>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        request.extensions_mut().insert(status.clone());
        app.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(peer_addr = %peer, error = %e, "Connection ended with error");
                }
                break;
            }
            _ = shutdown.recv(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}
