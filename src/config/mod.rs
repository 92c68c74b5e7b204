//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, then apply CLI overrides)
//!     → validation.rs (semantic checks, once, on the merged result)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no runtime reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{
    load_config, load_with_overrides, parse_config, ConfigError, ConfigOverrides,
};
pub use schema::{
    default_routes, BuildConfig, GatewayConfig, LimitsConfig, ListenerConfig, ListenerMode,
    LiveConfig, ObservabilityConfig, RouteConfig, TimeoutConfig, TlsConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
