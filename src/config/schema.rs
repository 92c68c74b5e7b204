//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration for the development gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// The single backend origin that proxied requests are sent to.
    pub upstream: UpstreamConfig,

    /// Ordered proxy rules. A path matching none of them is served locally.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Front-end build pipeline settings.
    pub build: BuildConfig,

    /// Live update (server-sent events) settings.
    pub live: LiveConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Route rules to use: the configured list, or the built-in defaults when
    /// none are configured.
    pub fn effective_routes(&self) -> Vec<RouteConfig> {
        if self.routes.is_empty() {
            default_routes()
        } else {
            self.routes.clone()
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind_address: String,

    /// Whether connections are TLS-terminated or plaintext.
    pub mode: ListenerMode,

    /// TLS material. Required (and complete) when `mode = "tls"`.
    pub tls: TlsConfig,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Upper bound on a single TLS handshake.
    pub handshake_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            mode: ListenerMode::Plaintext,
            tls: TlsConfig::default(),
            max_connections: 1024,
            handshake_timeout_secs: 10,
        }
    }
}

/// Listener transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListenerMode {
    /// HTTPS, terminated with the configured identity.
    Tls,
    /// Plain HTTP, for local-only development.
    #[default]
    Plaintext,
}

impl ListenerMode {
    /// Value used for `X-Forwarded-Proto`.
    pub fn scheme(&self) -> &'static str {
        match self {
            ListenerMode::Tls => "https",
            ListenerMode::Plaintext => "http",
        }
    }
}

/// TLS identity file locations (PEM).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Server certificate chain.
    pub cert_path: Option<PathBuf>,

    /// Private key for the leaf certificate.
    pub key_path: Option<PathBuf>,

    /// CA bundle presented after the server chain.
    pub ca_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Names of the identity files that are not configured.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.cert_path.is_none() {
            missing.push("cert_path");
        }
        if self.key_path.is_none() {
            missing.push("key_path");
        }
        if self.ca_path.is_none() {
            missing.push("ca_path");
        }
        missing
    }
}

/// Upstream (backend API) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream origin, e.g. "http://localhost:8080".
    pub url: String,

    /// Append the client address to `X-Forwarded-For` and set the
    /// `X-Forwarded-Proto` / `X-Forwarded-Port` headers.
    pub xfwd: bool,

    /// Rewrite the Host header to the upstream authority.
    pub change_origin: bool,

    /// Verify the upstream certificate when the upstream scheme is https.
    pub verify_tls: bool,

    /// Refuse to start when the upstream does not accept a TCP connection.
    pub probe_on_startup: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            xfwd: true,
            change_origin: false,
            verify_tls: true,
            probe_on_startup: false,
        }
    }
}

/// A single proxy rule. Rules are checked in the order they are declared.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteConfig {
    /// Regular expression, anchored at the start of the path.
    Regex(String),
    /// Literal path prefix.
    Prefix(String),
    /// Literal full path.
    Exact(String),
}

impl RouteConfig {
    /// The raw pattern text, whatever its kind.
    pub fn pattern(&self) -> &str {
        match self {
            RouteConfig::Regex(p) | RouteConfig::Prefix(p) | RouteConfig::Exact(p) => p,
        }
    }
}

/// Proxy rules used when the configuration does not list any.
pub fn default_routes() -> Vec<RouteConfig> {
    [
        "^/api/",
        "^/token",
        "^/authorize",
        "^/complete",
        "^/login",
        "^/consent",
        "^/register",
        "^/applications",
        "^/grants",
        "^/identity",
        "^/connect",
        "^/.well-known/",
        "^/jwks",
        "^/$",
    ]
    .into_iter()
    .map(|p| RouteConfig::Regex(p.to_string()))
    .collect()
}

/// Timeout configuration for upstream operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Maximum silence while reading from the upstream, in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            idle_secs: 60,
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum proxied request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Front-end build configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Working directory for the build command.
    pub project_dir: PathBuf,

    /// Directory watched for source changes (relative to `project_dir`).
    pub source_dir: PathBuf,

    /// Directory the bundler writes its output to (relative to `project_dir`).
    pub output_dir: PathBuf,

    /// Shell command that produces the output. When unset the output
    /// directory is assumed to be maintained by an external process.
    pub command: Option<String>,

    /// URL prefix the build output is mounted under.
    pub public_path: String,

    /// Well-known request paths mapped to output files.
    pub entry_aliases: BTreeMap<String, String>,

    /// Watch `source_dir` and rebuild on change.
    pub watch: bool,

    /// Quiet period before a burst of file events triggers a rebuild.
    pub debounce_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let mut entry_aliases = BTreeMap::new();
        entry_aliases.insert("/app.js".to_string(), "js/app.js".to_string());
        entry_aliases.insert("/app.css".to_string(), "css/app.css".to_string());

        Self {
            project_dir: PathBuf::from("web"),
            source_dir: PathBuf::from("src"),
            output_dir: PathBuf::from("dist"),
            command: None,
            public_path: "/".to_string(),
            entry_aliases,
            watch: true,
            debounce_ms: 200,
        }
    }
}

impl BuildConfig {
    /// Absolute-or-relative path of the source directory.
    pub fn source_path(&self) -> PathBuf {
        self.project_dir.join(&self.source_dir)
    }

    /// Absolute-or-relative path of the output directory.
    pub fn output_path(&self) -> PathBuf {
        self.project_dir.join(&self.output_dir)
    }
}

/// Live update channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Path of the server-sent events endpoint.
    pub path: String,

    /// Pending events kept per client before the oldest is dropped.
    pub queue_capacity: usize,

    /// Keep-alive comment interval in seconds.
    pub heartbeat_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            path: "/__live".to_string(),
            queue_capacity: 16,
            heartbeat_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log every inspected request path at info level.
    pub log_requests: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_requests: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.mode, ListenerMode::Plaintext);
        assert_eq!(config.upstream.url, "http://localhost:8080");
        assert!(!config.upstream.change_origin);
        assert_eq!(config.effective_routes(), default_routes());
    }

    #[test]
    fn parses_routes_in_order() {
        let config: GatewayConfig = toml::from_str(
            r#"
            routes = [
                { prefix = "/api/" },
                { exact = "/" },
                { regex = "^/token" },
            ]

            [listener]
            mode = "tls"

            [listener.tls]
            cert_path = "certs/server-cert.pem"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.routes,
            vec![
                RouteConfig::Prefix("/api/".into()),
                RouteConfig::Exact("/".into()),
                RouteConfig::Regex("^/token".into()),
            ]
        );
        assert_eq!(config.listener.mode, ListenerMode::Tls);
        assert_eq!(config.listener.tls.missing(), vec!["key_path", "ca_path"]);
    }
}
