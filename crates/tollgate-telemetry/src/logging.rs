//! Process-wide `tracing` subscriber and log hygiene helpers.
//!
//! Every format writes to stderr; stdout belongs to command output.

use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::{TelemetryConfig, TelemetryError};

/// Filter directives for a configured level.
///
/// Verbose levels apply to the tollgate crates only; dependencies such as
/// `redis` stay at `warn`. Anything else is passed through as a directive
/// string.
#[must_use]
pub fn log_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" => format!("warn,tollgate={level}"),
        _ => level,
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `config.log_level` when set. JSON output flattens
/// event fields into the top-level object.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(&config.log_level)));

    let format: Box<dyn Layer<Registry> + Send + Sync> = if config.json_logs {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(format)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::debug!(service = %config.service_name, json = config.json_logs, "logging initialized");
    Ok(())
}

/// Mask a caller identifier for log output, keeping a short prefix.
///
/// Caller ids may be API keys or user ids; logs only ever need enough to correlate.
#[must_use]
pub fn mask_caller_id(caller_id: &str) -> String {
    const VISIBLE: usize = 4;

    let visible: String = caller_id.chars().take(VISIBLE).collect();
    if caller_id.chars().count() <= VISIBLE {
        return "****".to_string();
    }
    format!("{visible}****")
}
