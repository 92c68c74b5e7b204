//! Error taxonomy for the gateway.
//!
//! - [`StartupError`]: fatal; the process exits before serving anything
//! - [`HandshakeError`]: one connection is closed, the gateway keeps running
//! - [`ProxyError`]: one request fails with 502, 504 or 413
//! - [`BuildError`]: last good artifacts keep being served
//! - [`GatewayError`]: anything a request handler turns into a response

use axum::http::StatusCode;
use thiserror::Error;

use crate::config::{ConfigError, ValidationError};
use crate::net::{ListenerError, TlsError};
use crate::proxy::{TargetError, UpstreamTarget};

pub use crate::build::{BuildError, NotFound};
pub use crate::net::HandshakeError;

/// Anything that stops the gateway from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("invalid route pattern '{pattern}': {source}")]
    Route {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid upstream: {0}")]
    Upstream(#[from] TargetError),

    #[error("upstream {target} unreachable: {source}")]
    UpstreamUnreachable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("cannot build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A failed forward to the upstream.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream {target} refused or dropped the connection: {source}")]
    Connect {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {target} timed out: {source}")]
    Timeout {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {target} failed: {source}")]
    Upstream {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("cannot read request body: {0}")]
    RequestBody(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("cannot relay upstream response: {0}")]
    Response(#[from] axum::http::Error),
}

impl ProxyError {
    /// Classify a client error from a send attempt.
    pub(crate) fn from_upstream(source: reqwest::Error, target: &UpstreamTarget) -> Self {
        let target = target.to_string();
        if source.is_timeout() {
            ProxyError::Timeout { target, source }
        } else if source.is_connect() {
            ProxyError::Connect { target, source }
        } else {
            ProxyError::Upstream { target, source }
        }
    }

    /// Status code returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Connect { .. }
            | ProxyError::Upstream { .. }
            | ProxyError::Response(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// A request-level failure, rendered as an HTTP response.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("method {0} not allowed for build output")]
    MethodNotAllowed(axum::http::Method),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Proxy(e) => e.status(),
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}
