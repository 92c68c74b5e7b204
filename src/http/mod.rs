//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept loop, middleware, dispatch)
//!     → request.rs (request ID)
//!     → routing (Proxy | LocalServe)
//!     → proxy forwarder | build adapter | live channel
//!     → response.rs (artifact headers, error statuses)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use response::X_BUILD_GENERATION;
pub use server::{AppState, GatewayServer};
