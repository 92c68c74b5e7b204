//! The upstream origin.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::UpstreamConfig;

/// Why an upstream URL was rejected.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported scheme '{0}' (expected http or https)")]
    Scheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("URL must be an origin without a path, found '{0}'")]
    Path(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    Http,
    Https,
}

impl UpstreamScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamScheme::Http => "http",
            UpstreamScheme::Https => "https",
        }
    }
}

/// Where proxied requests go and how they are rewritten on the way.
///
/// Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub scheme: UpstreamScheme,
    pub host: String,
    pub port: u16,
    /// Add `X-Forwarded-*` headers.
    pub xfwd: bool,
    /// Rewrite Host to the upstream authority.
    pub change_origin: bool,
    /// Verify the upstream certificate (https only).
    pub verify_tls: bool,
}

impl UpstreamTarget {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, TargetError> {
        let url = Url::parse(&config.url)?;

        let scheme = match url.scheme() {
            "http" => UpstreamScheme::Http,
            "https" => UpstreamScheme::Https,
            other => return Err(TargetError::Scheme(other.to_string())),
        };
        let host = url.host_str().ok_or(TargetError::MissingHost)?.to_string();
        let port = url.port_or_known_default().ok_or(TargetError::MissingHost)?;
        if url.path() != "/" || url.query().is_some() {
            return Err(TargetError::Path(url.path().to_string()));
        }

        Ok(Self {
            scheme,
            host,
            port,
            xfwd: config.xfwd,
            change_origin: config.change_origin,
            verify_tls: config.verify_tls,
        })
    }

    /// `host:port`, suitable for a Host header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Absolute URL for a request's path and query.
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}://{}{}", self.scheme.as_str(), self.authority(), path_and_query)
    }

    /// Resolve the host, failing if it has no addresses.
    pub async fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, self.port)).await?.collect();
        if addrs.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} resolved to no addresses", self.host),
            ));
        }
        Ok(addrs)
    }

    /// Open (and immediately close) a TCP connection to the upstream.
    pub async fn probe(&self, timeout: Duration) -> std::io::Result<()> {
        let addrs = self.resolve().await?;
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addrs[..])).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no connection to {} within {:?}", self.authority(), timeout),
            )),
        }
    }
}

impl std::fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> Result<UpstreamTarget, TargetError> {
        UpstreamTarget::from_config(&UpstreamConfig {
            url: url.to_string(),
            ..UpstreamConfig::default()
        })
    }

    #[test]
    fn parses_default_upstream() {
        let t = target("http://localhost:8080").unwrap();
        assert_eq!(t.scheme, UpstreamScheme::Http);
        assert_eq!(t.authority(), "localhost:8080");
        assert_eq!(t.url_for("/api/users?page=2"), "http://localhost:8080/api/users?page=2");
        assert!(t.xfwd);
        assert!(!t.change_origin);
    }

    #[test]
    fn default_ports() {
        assert_eq!(target("https://api.example.com").unwrap().port, 443);
        assert_eq!(target("http://api.example.com/").unwrap().port, 80);
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(matches!(target("ftp://example.com"), Err(TargetError::Scheme(_))));
        assert!(matches!(target("http://example.com/api"), Err(TargetError::Path(_))));
        assert!(matches!(target("not a url"), Err(TargetError::Url(_))));
    }

    #[tokio::test]
    async fn probe_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let t = target(&format!("http://127.0.0.1:{port}")).unwrap();
        assert!(t.probe(Duration::from_secs(2)).await.is_err());
    }
}
