//! Metrics collection and exposition.
//!
//! # Metrics
//! - `txmgr_transitions_total` (counter): state transitions by target status
//! - `txmgr_resubmissions_total` (counter): rebroadcasts of stuck transactions
//! - `txmgr_connection_resets_total` (counter): partition-triggered resets
//! - `txmgr_gateway_errors_total` (counter): calls that failed on every endpoint, by method
//! - `txmgr_signing_failures_total` (counter): custody failures, by service
//! - `txmgr_open_transactions` (gauge): non-terminal records in the tracker cache
//! - `txmgr_node_health` (gauge): 1=available, 0=failed, per endpoint
//! - `txmgr_node_latency_seconds` (histogram): probe and call latency, per endpoint
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::txn::state::TxStatus;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_transition(to: TxStatus) {
    counter!("txmgr_transitions_total", "status" => to.as_str()).increment(1);
}

pub fn record_resubmission(service: &str) {
    counter!("txmgr_resubmissions_total", "service" => service.to_string()).increment(1);
}

pub fn record_connection_reset() {
    counter!("txmgr_connection_resets_total").increment(1);
}

pub fn record_gateway_error(method: &str) {
    counter!("txmgr_gateway_errors_total", "method" => method.to_string()).increment(1);
}

pub fn record_signing_failure(service: &str) {
    counter!("txmgr_signing_failures_total", "service" => service.to_string()).increment(1);
}

pub fn set_open_transactions(count: usize) {
    gauge!("txmgr_open_transactions").set(count as f64);
}

pub fn record_node_health(endpoint: &str, healthy: bool) {
    gauge!("txmgr_node_health", "endpoint" => endpoint.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_node_latency(endpoint: &str, latency: Duration) {
    histogram!("txmgr_node_latency_seconds", "endpoint" => endpoint.to_string())
        .record(latency.as_secs_f64());
}
