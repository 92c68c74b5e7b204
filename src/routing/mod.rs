//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → classifier.rs (ordered rule scan)
//!     → rule.rs (evaluate one pattern)
//!     → Return: Proxy or LocalServe
//!
//! Rule compilation (at startup):
//!     RouteConfig[] (declaration order)
//!     → compile regex / prefix / exact patterns
//!     → freeze as immutable Classifier
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - Deterministic: same path always classifies the same way
//! - First match wins; no match means LocalServe

pub mod classifier;
pub mod rule;

pub use classifier::{Classification, Classifier};
pub use rule::RouteRule;
