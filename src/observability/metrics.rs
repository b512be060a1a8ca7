//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define capture metrics (connections, durations, relayed bytes)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `capture_connections_total` (counter): finished connections by protocol, outcome
//! - `capture_active_connections` (gauge): connections currently being served
//! - `capture_connection_duration_seconds` (histogram): connection lifetime by protocol
//! - `capture_relayed_bytes_total` (counter): payload bytes by protocol, direction
//! - `capture_upstream_failures_total` (counter): failed upstream dials by protocol
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::protocol::PacketDirection;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened() {
    gauge!("capture_active_connections").increment(1.0);
}

pub fn record_connection_closed(protocol: &'static str, outcome: &'static str, duration: Duration) {
    gauge!("capture_active_connections").decrement(1.0);
    counter!("capture_connections_total", "protocol" => protocol, "outcome" => outcome).increment(1);
    histogram!("capture_connection_duration_seconds", "protocol" => protocol)
        .record(duration.as_secs_f64());
}

pub fn record_relayed_bytes(protocol: &'static str, direction: PacketDirection, bytes: usize) {
    counter!(
        "capture_relayed_bytes_total",
        "protocol" => protocol,
        "direction" => direction.as_str()
    )
    .increment(bytes as u64);
}

pub fn record_upstream_failure(protocol: &'static str) {
    counter!("capture_upstream_failures_total", "protocol" => protocol).increment(1);
}
