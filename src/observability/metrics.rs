//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, classification
//! - `gateway_request_duration_seconds` (histogram): latency by classification
//! - `gateway_tls_handshake_failures_total` (counter): failed handshakes by reason
//! - `gateway_builds_total` (counter): builds by outcome
//! - `gateway_build_duration_seconds` (histogram): build latency
//! - `gateway_live_clients` (gauge): connected live-update clients
//!
//! Recording is a no-op until a recorder is installed, so the helpers are
//! safe to call whether or not the exporter is enabled.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, classification: &'static str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "classification" => classification
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "classification" => classification
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_handshake_failure(reason: &'static str) {
    counter!("gateway_tls_handshake_failures_total", "reason" => reason).increment(1);
}

pub fn record_build(outcome: &'static str, start: Instant) {
    counter!("gateway_builds_total", "outcome" => outcome).increment(1);
    histogram!("gateway_build_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn set_live_clients(count: usize) {
    gauge!("gateway_live_clients").set(count as f64);
}
