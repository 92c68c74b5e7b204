//! Bounded TCP accept.
//!
//! A connection slot is taken before `accept` is called, so once
//! `listener.max_connections` connections are open new clients queue in the
//! kernel backlog instead of being accepted and starved.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// Transient; the accept loop keeps going.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connection limiter closed")]
    Closed,
}

/// The gateway's listening socket plus its connection slots.
pub struct Listener {
    tcp: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let tcp = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Ok(Self::from_tcp(tcp, config.max_connections))
    }

    /// Wrap a socket that is already bound, e.g. to an ephemeral port.
    pub fn from_tcp(tcp: TcpListener, max_connections: usize) -> Self {
        if let Ok(address) = tcp.local_addr() {
            tracing::info!(%address, max_connections, "Listener bound");
        }
        Self {
            tcp,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Wait for a free slot, then for a client.
    ///
    /// The permit must live as long as the connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        if self.slots.available_permits() == 0 {
            tracing::debug!(
                max_connections = self.max_connections,
                "Connection limit reached, new clients wait in the backlog"
            );
        }
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = self.tcp.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(peer_addr = %peer, open = self.open_connections(), "Connection accepted");

        Ok((stream, peer, ConnectionPermit { _slot: permit }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Connections currently holding a slot.
    pub fn open_connections(&self) -> usize {
        self.max_connections - self.slots.available_permits()
    }
}

/// One connection slot, released on drop (also when the connection task
/// panics).
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
}
