//! Prometheus exposition for Tollgate metrics.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::TelemetryError;

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP listener on the given port serving metrics in Prometheus
/// exposition format. Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed or the port is taken.
pub fn init_prometheus_exporter(port: u16) -> Result<(), TelemetryError> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    tracing::info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}
