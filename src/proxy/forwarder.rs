//! Forwarding requests to the upstream.
//!
//! # Responsibilities
//! - Replay method, path, query, headers and body against the upstream
//! - Apply the forwarded-header and Host policies
//! - Relay the upstream response, streaming its body
//!
//! # Design Decisions
//! - One pooled client per target; connections are reused across requests
//! - Request bodies are read up to a limit; response bodies are never buffered
//! - Single attempt per request, no retries
//! - Redirects are relayed to the client, never followed

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::config::{LimitsConfig, TimeoutConfig};
use crate::error::ProxyError;
use crate::proxy::headers::{append_forwarded, set_host, strip_hop_by_hop};
use crate::proxy::target::UpstreamTarget;

/// Per-connection facts the forwarder needs for `X-Forwarded-*`.
#[derive(Debug, Clone, Copy)]
pub struct ForwardContext {
    /// Client socket address.
    pub peer: SocketAddr,
    /// Scheme the client used to reach the gateway.
    pub scheme: &'static str,
    /// Port the client connected to.
    pub port: u16,
}

/// Sends proxied requests to one [`UpstreamTarget`].
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    target: Arc<UpstreamTarget>,
    max_body_bytes: usize,
}

impl Forwarder {
    pub fn new(
        target: UpstreamTarget,
        timeouts: &TimeoutConfig,
        limits: &LimitsConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .read_timeout(Duration::from_secs(timeouts.idle_secs))
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!target.verify_tls)
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            target: Arc::new(target),
            max_body_bytes: limits.max_body_bytes,
        })
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Forward one request and relay the upstream's response.
    ///
    /// Dropping the returned future (client went away) abandons the upstream
    /// request and its pooled connection.
    pub async fn forward(
        &self,
        request: Request<Body>,
        ctx: &ForwardContext,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = self.target.url_for(path_and_query);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        if self.target.xfwd {
            append_forwarded(&mut headers, ctx.peer.ip(), ctx.scheme, ctx.port);
        }
        set_host(
            &mut headers,
            self.target.change_origin,
            &self.target.authority(),
            parts.uri.authority().map(|a| a.as_str()),
        );

        let body = Limited::new(body, self.max_body_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    ProxyError::BodyTooLarge {
                        limit: self.max_body_bytes,
                    }
                } else {
                    ProxyError::RequestBody(e)
                }
            })?
            .to_bytes();

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::from_upstream(e, &self.target))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::builder().status(status);
        if let Some(headers) = response.headers_mut() {
            *headers = response_headers;
        }
        Ok(response.body(Body::from_stream(upstream.bytes_stream()))?)
    }
}
