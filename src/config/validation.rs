//! Configuration validation.
//!
//! Serde handles the syntactic checks; this module covers the semantic ones:
//! addresses parse, patterns compile, the TLS identity is complete when TLS
//! is selected, and numeric limits are non-zero. All problems are reported,
//! not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, ListenerMode};
use crate::proxy::UpstreamTarget;
use crate::routing::RouteRule;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("upstream.url '{url}': {reason}")]
    Upstream { url: String, reason: String },

    #[error("route pattern '{pattern}': {reason}")]
    Route { pattern: String, reason: String },

    #[error("listener.mode is tls but listener.tls is missing {}", .0.join(", "))]
    IncompleteTls(Vec<&'static str>),

    #[error("{field} '{value}' must start with '/'")]
    NotAbsolute { field: &'static str, value: String },
}

/// Validate a configuration, returning every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.listener.mode == ListenerMode::Tls {
        let missing = config.listener.tls.missing();
        if !missing.is_empty() {
            errors.push(ValidationError::IncompleteTls(missing));
        }
    }

    let positive = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("listener.handshake_timeout_secs", config.listener.handshake_timeout_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.idle_secs", config.timeouts.idle_secs),
        ("limits.max_body_bytes", config.limits.max_body_bytes as u64),
        ("live.queue_capacity", config.live.queue_capacity as u64),
        ("live.heartbeat_secs", config.live.heartbeat_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if let Err(e) = UpstreamTarget::from_config(&config.upstream) {
        errors.push(ValidationError::Upstream {
            url: config.upstream.url.clone(),
            reason: e.to_string(),
        });
    }

    for route in &config.routes {
        if let Err(e) = RouteRule::compile(route) {
            errors.push(ValidationError::Route {
                pattern: route.pattern().to_string(),
                reason: e.to_string(),
            });
        }
    }

    if !config.live.path.starts_with('/') {
        errors.push(ValidationError::NotAbsolute {
            field: "live.path",
            value: config.live.path.clone(),
        });
    }
    if !config.build.public_path.starts_with('/') {
        errors.push(ValidationError::NotAbsolute {
            field: "build.public_path",
            value: config.build.public_path.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
