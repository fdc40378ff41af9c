//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record the number of live sessions.
pub fn record_sessions(count: usize) {
    metrics::gauge!("waku_sessions_active").set(count as f64);
}

/// Record one webhook POST attempt.
pub fn record_webhook_attempt() {
    metrics::counter!("waku_webhook_attempts_total").increment(1);
}

/// Record a notification delivered to the webhook.
pub fn record_webhook_delivered() {
    metrics::counter!("waku_webhook_delivered_total").increment(1);
}

/// Record a notification dropped after exhausting its retries.
pub fn record_webhook_exhausted() {
    metrics::counter!("waku_webhook_exhausted_total").increment(1);
}
