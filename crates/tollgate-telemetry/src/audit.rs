//! Audit events for connection lifecycle and configuration failures.
//!
//! Emission is fire-and-forget: `AuditSink::emit` is synchronous, never blocks,
//! and never reports failure to the caller. Loss on crash is tolerated.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    /// Routine lifecycle information.
    Info,
    /// Degraded operation.
    Warning,
    /// Operator attention required.
    Critical,
}

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Cache connection moved between states.
    ConnectionStateChanged,
    /// A reconnection attempt is scheduled.
    ReconnectAttempt,
    /// Reconnection gave up; the connection is terminal.
    ReconnectExhausted,
    /// The periodic liveness probe failed.
    HealthProbeFailed,
    /// Startup configuration could not be loaded or validated.
    ConfigurationFailure,
}

impl AuditEventKind {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionStateChanged => "connection_state_changed",
            Self::ReconnectAttempt => "reconnect_attempt",
            Self::ReconnectExhausted => "reconnect_exhausted",
            Self::HealthProbeFailed => "health_probe_failed",
            Self::ConfigurationFailure => "configuration_failure",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub severity: AuditSeverity,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(
        kind: AuditEventKind,
        severity: AuditSeverity,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            component: component.into(),
            message: message.into(),
            fields: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a structured field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up a structured field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Emit an event. Must not block and must not panic.
    fn emit(&self, event: AuditEvent);
}

/// Writes audit events to the `tracing` pipeline under the `tollgate::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let fields = Value::Object(event.fields);
        match event.severity {
            AuditSeverity::Info => tracing::info!(
                target: "tollgate::audit",
                kind = %event.kind,
                component = %event.component,
                fields = %fields,
                "{}", event.message
            ),
            AuditSeverity::Warning => tracing::warn!(
                target: "tollgate::audit",
                kind = %event.kind,
                component = %event.component,
                fields = %fields,
                "{}", event.message
            ),
            AuditSeverity::Critical => tracing::error!(
                target: "tollgate::audit",
                kind = %event.kind,
                component = %event.component,
                fields = %fields,
                "{}", event.message
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

/// Forwards events into a bounded channel consumed by an audit collaborator.
///
/// Events are dropped (and counted) when the channel is full or closed.
#[derive(Debug)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
    dropped: AtomicU64,
}

impl ChannelAuditSink {
    /// Create a sink and the receiving half of its channel.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Number of events dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) {
        let reason = match self.tx.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => "full",
            Err(TrySendError::Closed(_)) => "closed",
        };
        self.dropped.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_audit_dropped(reason);
        tracing::debug!(reason, "audit event dropped");
    }
}
