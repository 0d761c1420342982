//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Record a new WebSocket connection.
pub fn record_ws_connect() {
    metrics::gauge!("ws_connections_active").increment(1.0);
}

/// Record a WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::gauge!("ws_connections_active").decrement(1.0);
}

/// Record a completed turn with its duration.
pub fn record_turn(mode: &str, duration_secs: f64) {
    let labels = [("mode", mode.to_string())];
    metrics::counter!("turns_total", &labels).increment(1);
    metrics::histogram!("turn_duration_seconds", &labels).record(duration_secs);
}

pub fn record_synthesis_failures(count: usize) {
    if count > 0 {
        metrics::counter!("synthesis_failures_total").increment(count as u64);
    }
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}
