//! Metrics for admission decisions and store health.

use std::sync::OnceLock;

use metrics::{Label, counter, describe_counter, describe_gauge, gauge};

/// Global metrics registry state.
static METRICS_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Describe the standard Tollgate metrics. Idempotent.
pub fn init_metrics() {
    if METRICS_INITIALIZED.set(true).is_err() {
        return;
    }

    describe_counter!(
        "tollgate_decisions_total",
        "Admission decisions by endpoint, outcome and reason"
    );
    describe_gauge!(
        "tollgate_adjusted_limit",
        "Most recent adjusted limit per endpoint"
    );
    describe_gauge!(
        "tollgate_store_state",
        "Cache connection state (1=connected, 0.5=connecting/reconnecting, 0=error/disconnected)"
    );
    describe_counter!(
        "tollgate_store_retries_total",
        "Transient store errors retried, by error kind"
    );
    describe_counter!(
        "tollgate_reconnect_attempts_total",
        "Cache reconnection attempts"
    );
    describe_counter!(
        "tollgate_audit_events_dropped_total",
        "Audit events dropped because the sink was full or closed"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Generic helpers
// ─────────────────────────────────────────────────────────────────────────────

fn owned_labels(labels: &[(&'static str, &str)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, (*value).to_string()))
        .collect()
}

/// Increment a counter by 1.
pub fn increment_counter(name: &'static str, labels: &[(&'static str, &str)]) {
    counter!(name, owned_labels(labels)).increment(1);
}

/// Set a gauge value.
pub fn set_gauge(name: &'static str, value: f64, labels: &[(&'static str, &str)]) {
    gauge!(name, owned_labels(labels)).set(value);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tollgate helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Record an admission decision.
pub fn record_decision(endpoint: &str, allowed: bool, reason: &str, adjusted_limit: u32) {
    let outcome = if allowed { "allowed" } else { "denied" };
    increment_counter(
        "tollgate_decisions_total",
        &[("endpoint", endpoint), ("outcome", outcome), ("reason", reason)],
    );
    set_gauge(
        "tollgate_adjusted_limit",
        f64::from(adjusted_limit),
        &[("endpoint", endpoint)],
    );
}

/// Cache connection state, as exported on `tollgate_store_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStateMetric {
    /// Connected and serving commands.
    Connected,
    /// Connecting or reconnecting.
    Transitioning,
    /// Disconnected or in error.
    Down,
}

/// Update the store state gauge.
pub fn set_store_state(state: StoreStateMetric) {
    let value = match state {
        StoreStateMetric::Connected => 1.0,
        StoreStateMetric::Transitioning => 0.5,
        StoreStateMetric::Down => 0.0,
    };
    set_gauge("tollgate_store_state", value, &[]);
}

/// Record a retried transient store error.
pub fn record_store_retry(kind: &str) {
    increment_counter("tollgate_store_retries_total", &[("kind", kind)]);
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt() {
    increment_counter("tollgate_reconnect_attempts_total", &[]);
}

/// Record a dropped audit event.
pub fn record_audit_dropped(reason: &str) {
    increment_counter("tollgate_audit_events_dropped_total", &[("reason", reason)]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_without_recorder_are_noops() {
        init_metrics();
        init_metrics();
        record_decision("/api/login", true, "adaptive", 120);
        set_store_state(StoreStateMetric::Connected);
        record_store_retry("timeout");
        record_reconnect_attempt();
        record_audit_dropped("full");
    }

    #[test]
    fn test_labels_reach_the_recorder() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_decision("/api/login", false, "store_fallback", 42);
            record_store_retry("busy");
        });

        let rendered = handle.render();
        assert!(rendered.contains("tollgate_decisions_total{"));
        assert!(rendered.contains(r#"endpoint="/api/login""#));
        assert!(rendered.contains(r#"outcome="denied""#));
        assert!(rendered.contains(r#"reason="store_fallback""#));
        assert!(rendered.contains("tollgate_adjusted_limit{"));
        assert!(rendered.contains(r#"tollgate_store_retries_total{kind="busy"} 1"#));
    }
}
