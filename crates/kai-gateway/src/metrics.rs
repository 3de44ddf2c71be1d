//! Prometheus metrics recording.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn record_call_start() {
    metrics::gauge!("calls_active").increment(1.0);
    metrics::counter!("calls_total").increment(1);
}

pub fn record_call_end() {
    metrics::gauge!("calls_active").decrement(1.0);
}

pub fn record_barge_in() {
    metrics::counter!("barge_ins_total").increment(1);
}

pub fn record_tool_call(tool: &str) {
    let labels = [("tool", tool.to_string())];
    metrics::counter!("tool_calls_total", &labels).increment(1);
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}
