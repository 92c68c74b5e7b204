//! Header rewriting for forwarded requests and relayed responses.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Add X-Forwarded-For / -Proto / -Port
//! - Preserve or rewrite Host

use std::net::IpAddr;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "proxy-authenticate",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }

    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in names {
        headers.remove(name);
    }
}

/// Append the client address to `X-Forwarded-For` and record the scheme and
/// port the client connected to.
pub fn append_forwarded(headers: &mut HeaderMap, client: IpAddr, proto: &'static str, port: u16) {
    let client = client.to_string();
    let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing.trim(), client),
        _ => client,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
    headers.insert(X_FORWARDED_PORT, HeaderValue::from(port));
}

/// Make sure the forwarded request carries the right Host.
///
/// With `change_origin` the Host becomes the upstream authority. Otherwise
/// the client's Host is kept; HTTP/2 clients send `:authority` instead of a
/// Host header, so that value is used when Host is absent.
pub fn set_host(
    headers: &mut HeaderMap,
    change_origin: bool,
    upstream_authority: &str,
    request_authority: Option<&str>,
) {
    if change_origin {
        if let Ok(value) = HeaderValue::from_str(upstream_authority) {
            headers.insert(HOST, value);
        }
        return;
    }
    if headers.contains_key(HOST) {
        return;
    }
    if let Some(value) = request_authority.and_then(|a| HeaderValue::from_str(a).ok()) {
        headers.insert(HOST, value);
    }
}
