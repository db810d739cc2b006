//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (RPS, latency, errors, sessions, tunnels)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): proxied requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_upstream_errors_total` (counter): transport failures by kind
//! - `proxy_sessions_created_total` (counter)
//! - `proxy_sessions_active` (gauge): live sessions in the registry
//! - `proxy_tunnels_active` (gauge): open WebSocket tunnels
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels are low-cardinality (no session ids, no paths)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(kind: &'static str) {
    ::metrics::counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_session_created() {
    ::metrics::counter!("proxy_sessions_created_total").increment(1);
}

pub fn record_sessions_active(count: usize) {
    ::metrics::gauge!("proxy_sessions_active").set(count as f64);
}

pub fn record_tunnel_opened() {
    ::metrics::gauge!("proxy_tunnels_active").increment(1.0);
}

pub fn record_tunnel_closed() {
    ::metrics::gauge!("proxy_tunnels_active").decrement(1.0);
}
