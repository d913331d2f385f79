//! Tollgate Telemetry - logging, metrics and audit events for admission control.
//!
//! - **Structured Logging**: JSON or pretty `tracing` output with `EnvFilter` support
//! - **Metrics**: counters and gauges for decisions and store health
//! - **Audit Events**: fire-and-forget sink for connection and configuration events
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tollgate_telemetry::{TelemetryConfig, init_telemetry};
//!
//! init_telemetry(&TelemetryConfig::new("tollgate").with_log_level("debug"))?;
//! tracing::info!(endpoint = "/api/login", "admission control ready");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod audit;
mod export;
mod logging;
pub mod metrics;
mod tracing_config;

pub use audit::*;
pub use export::*;
pub use logging::*;
pub use tracing_config::*;

use serde::{Deserialize, Serialize};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to logs.
    pub service_name: String,

    /// Log level filter (e.g., "info", "debug", "trace").
    pub log_level: String,

    /// Enable JSON log output.
    pub json_logs: bool,

    /// Enable the Prometheus metrics endpoint.
    pub prometheus_enabled: bool,

    /// Prometheus metrics endpoint port.
    pub prometheus_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "tollgate".to_string(),
            log_level: "info".to_string(),
            json_logs: true,
            prometheus_enabled: false,
            prometheus_port: 9090,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable or disable JSON logs.
    #[must_use]
    pub const fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    /// Enable Prometheus metrics on the given port.
    #[must_use]
    pub const fn with_prometheus(mut self, port: u16) -> Self {
        self.prometheus_enabled = true;
        self.prometheus_port = port;
        self
    }
}

/// Initialize logging, metric descriptions and (optionally) the Prometheus exporter.
///
/// Call once at process start. The Prometheus listener needs a running tokio runtime.
///
/// # Errors
///
/// Returns an error if a global subscriber or recorder is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_logging(config)?;
    crate::metrics::init_metrics();

    if config.prometheus_enabled {
        init_prometheus_exporter(config.prometheus_port)?;
    }

    tracing::debug!(
        service = %config.service_name,
        json = config.json_logs,
        prometheus = config.prometheus_enabled,
        "telemetry initialized"
    );

    Ok(())
}

/// Telemetry error type.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Failed to initialize metrics.
    #[error("Failed to initialize metrics: {0}")]
    MetricsInit(String),
}
