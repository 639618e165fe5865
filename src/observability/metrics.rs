//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define session guard metrics (refreshes, retries, queue, breaker)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `session_refresh_total` (counter): refresh outcomes by `outcome`
//! - `session_retries_total` (counter): backoff retries by `policy`
//! - `session_queue_depth` (gauge): requests waiting on a refresh
//! - `session_queue_overflow_total` (counter): requests rejected for space
//! - `session_terminated_total` (counter): forced logouts
//! - `session_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels are static strings only

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Start the Prometheus scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_refresh(outcome: &'static str) {
    counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_retry(policy: &'static str) {
    counter!("session_retries_total", "policy" => policy).increment(1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("session_queue_depth").set(depth as f64);
}

pub fn record_queue_overflow() {
    counter!("session_queue_overflow_total").increment(1);
}

pub fn record_session_terminated() {
    counter!("session_terminated_total").increment(1);
}

pub fn record_circuit_state(breaker: &'static str, state: CircuitState) {
    gauge!("session_circuit_state", "breaker" => breaker).set(state as u8 as f64);
}
