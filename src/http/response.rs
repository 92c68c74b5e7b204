//! Response construction.
//!
//! # Responsibilities
//! - Render build artifacts with caching headers
//! - Honor `If-None-Match` with 304
//! - Map request-level errors to status codes
//!
//! # Design Decisions
//! - `Cache-Control: no-cache`: browsers revalidate on every load, so a
//!   rebuild is picked up without a hard refresh
//! - Error bodies are short plain text

use axum::body::Body;
use axum::http::header::{
    HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG,
};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::build::Served;
use crate::error::GatewayError;

pub const X_BUILD_GENERATION: HeaderName = HeaderName::from_static("x-build-generation");

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Does an `If-None-Match` header match `etag`? Weak comparison.
fn etag_matches(if_none_match: &HeaderValue, etag: &str) -> bool {
    let Ok(value) = if_none_match.to_str() else {
        return false;
    };
    let opaque = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let etag = opaque(etag);
    value
        .split(',')
        .any(|candidate| candidate.trim() == "*" || opaque(candidate) == etag)
}

/// Render a cache hit.
pub fn artifact_response(
    served: &Served,
    method: &Method,
    if_none_match: Option<&HeaderValue>,
) -> Response {
    let artifact = &served.artifact;
    let etag = artifact.etag();
    let not_modified = if_none_match.is_some_and(|v| etag_matches(v, &etag));

    let status = if not_modified {
        StatusCode::NOT_MODIFIED
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header(CACHE_CONTROL, "no-cache")
        .header(ETAG, etag)
        .header(X_BUILD_GENERATION, served.generation);

    if not_modified {
        return builder
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    builder = builder
        .header(CONTENT_TYPE, artifact.content_type.as_str())
        .header(CONTENT_LENGTH, artifact.content.len());

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(artifact.content.clone())
    };
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::build::Artifact;

    fn served() -> Served {
        Served {
            artifact: Arc::new(Artifact {
                content: "body{}".into(),
                content_type: "text/css".into(),
                generation: 4,
            }),
            generation: 5,
            logical_path: "css/app.css".into(),
        }
    }

    #[test]
    fn ok_carries_caching_headers() {
        let response = artifact_response(&served(), &Method::GET, None);
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "text/css");
        assert_eq!(headers[CONTENT_LENGTH], "6");
        assert_eq!(headers[CACHE_CONTROL], "no-cache");
        assert_eq!(headers[ETAG], "W/\"4-6\"");
        assert_eq!(headers[X_BUILD_GENERATION], "5");
    }

    #[test]
    fn matching_etag_is_not_modified() {
        let tag = HeaderValue::from_static("\"0-1\", W/\"4-6\"");
        let response = artifact_response(&served(), &Method::GET, Some(&tag));
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let stale = HeaderValue::from_static("W/\"3-6\"");
        let response = artifact_response(&served(), &Method::GET, Some(&stale));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn errors_map_to_status() {
        let response = GatewayError::MethodNotAllowed(Method::POST).into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
