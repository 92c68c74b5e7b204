//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (TLS handshake, unless plaintext mode)
//!     → connection.rs (lifecycle tracking, HTTP/1.1 + HTTP/2 serving)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Connecting → Handshaking → Routing → Proxying | Serving → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - A failed handshake closes that connection only

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{serve_connection, ConnectionState, ConnectionStatus, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use tls::{HandshakeError, TlsAcceptor, TlsError, TlsIdentity};
