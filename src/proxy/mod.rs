//! Backend proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Request classified as Proxy
//!     → headers.rs (strip hop-by-hop, X-Forwarded-*, Host policy)
//!     → forwarder.rs (pooled client, single attempt, bounded timeouts)
//!     → target.rs (the one configured upstream origin)
//!     → Response streamed back to the client
//! ```
//!
//! # Design Decisions
//! - Upstream is fixed at startup
//! - Refused or failed upstream connections surface as 502, timeouts as 504

pub mod forwarder;
pub mod headers;
pub mod target;

pub use forwarder::{ForwardContext, Forwarder};
pub use target::{TargetError, UpstreamScheme, UpstreamTarget};
