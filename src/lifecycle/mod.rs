//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (http::server::GatewayServer::with_pipeline):
//!     Validate config → Load TLS → Compile routes → Resolve upstream → Bind
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → End live streams → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Every startup check runs before the listening port is opened
//! - Shutdown has a timeout: connections still open after it are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_shutdown_signal};
