//! Local development gateway.
//!
//! Terminates TLS in front of a developer's machine and routes each request
//! by path: API and identity paths go to a backend origin, everything else
//! is served from an in-memory front-end build that live-reloads connected
//! browsers when it changes.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Destinations
pub mod build;
pub mod live;
pub mod proxy;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use error::{GatewayError, ProxyError, StartupError};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
