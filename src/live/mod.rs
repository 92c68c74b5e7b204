//! Live update channel.
//!
//! # Data Flow
//! ```text
//! BuildAdapter (rebuild finished)
//!     → hub.rs (publish: fan out to every client queue)
//!     → sse.rs (per-client event stream on the live path)
//!     → Browser reloads
//! ```
//!
//! # Design Decisions
//! - Queues are bounded; slow clients lose their oldest events, never block
//!   the publisher
//! - Clients are unregistered when their connection closes

pub mod hub;
pub mod sse;

pub use hub::{ClientChannel, LiveEvent, LiveHub};
pub use sse::sse_response;
