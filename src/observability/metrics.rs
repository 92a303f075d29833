//! Metrics collection and exposition.
//!
//! # Metrics
//! - `engine_dispatch_total` (counter): dispatches by method, status
//! - `engine_dispatch_duration_seconds` (histogram): dispatch latency
//! - `engine_cache_lookups_total` (counter): strategy lookups by outcome
//! - `engine_background_ports_total` (counter): port lifecycle events
//! - `engine_sessions` (gauge): live session records
//! - `engine_retry_after_total` (counter): Retry-After re-dispatches

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_dispatch(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("engine_dispatch_total", &labels).increment(1);
    metrics::histogram!("engine_dispatch_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(strategy: &'static str, outcome: &'static str) {
    metrics::counter!(
        "engine_cache_lookups_total",
        "strategy" => strategy,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_background_port(event: &'static str) {
    metrics::counter!("engine_background_ports_total", "event" => event).increment(1);
}

pub fn record_session_count(count: usize) {
    metrics::gauge!("engine_sessions").set(count as f64);
}

pub fn record_retry(attempt: u32) {
    metrics::counter!("engine_retry_after_total", "attempt" => attempt.to_string()).increment(1);
}
