//! Resilient cache connection.
//!
//! Owns the connection state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected | Error
//! Connected -(socket error / failed probe)-> Error -> Reconnecting -> Connecting -> Connected | Error
//! ```
//!
//! Reconnection is bounded by `max_reconnect_attempts`; once exhausted the
//! connection is terminal and every operation fails fast with
//! [`StoreError::ReconnectExhausted`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tollgate_telemetry::metrics::{
    StoreStateMetric, record_reconnect_attempt, record_store_retry, set_store_state,
};
use tollgate_telemetry::{AuditEvent, AuditEventKind, AuditSeverity, AuditSink};
use tracing::{debug, error, info, warn};

use crate::backend::{BackendConnector, KvBackend, Topology};
use crate::command::{StoreCommand, StoreReply};
use crate::config::{BackendKind, CacheConfig};
use crate::error::{StoreError, TransientKind};
use crate::memory::MemoryConnector;
use crate::redis_backend::RedisConnector;

const COMPONENT: &str = "cache_connection";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Only `Connected` serves commands.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Connected)
    }

    const fn metric(self) -> StoreStateMetric {
        match self {
            Self::Connected => StoreStateMetric::Connected,
            Self::Connecting | Self::Reconnecting => StoreStateMetric::Transitioning,
            Self::Disconnected | Self::Error => StoreStateMetric::Down,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the connector for the configured backend.
///
/// # Errors
///
/// Returns [`StoreError::InvalidConfig`] when the Redis target is incomplete.
pub fn build_connector(config: &CacheConfig) -> Result<Arc<dyn BackendConnector>, StoreError> {
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryConnector::default())),
        BackendKind::Redis => Ok(Arc::new(RedisConnector::from_config(config)?)),
    }
}

struct Inner {
    config: CacheConfig,
    connector: Arc<dyn BackendConnector>,
    audit: Arc<dyn AuditSink>,
    backend: RwLock<Option<Arc<dyn KvBackend>>>,
    state: Mutex<ConnectionState>,
    reconnecting: AtomicBool,
    probing: AtomicBool,
    exhausted: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn transition(&self, to: ConnectionState, severity: AuditSeverity, detail: &str) {
        let from = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, to)
        };
        if from == to {
            return;
        }

        set_store_state(to.metric());
        match to {
            ConnectionState::Error => warn!(%from, %to, detail, "cache connection state changed"),
            _ => info!(%from, %to, detail, "cache connection state changed"),
        }
        self.audit.emit(
            AuditEvent::new(
                AuditEventKind::ConnectionStateChanged,
                severity,
                COMPONENT,
                format!("{from} -> {to}"),
            )
            .with_field("from", from.as_str())
            .with_field("to", to.as_str())
            .with_field("detail", detail),
        );
    }

    fn current_backend(&self) -> Result<Arc<dyn KvBackend>, StoreError> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(StoreError::ReconnectExhausted {
                attempts: self.config.max_reconnect_attempts,
            });
        }
        if !self.state().is_healthy() {
            return Err(StoreError::NotConnected);
        }
        self.backend.read().clone().ok_or(StoreError::NotConnected)
    }

    async fn open(&self) -> Result<Arc<dyn KvBackend>, StoreError> {
        match tokio::time::timeout(self.config.connect_timeout(), self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::transient(
                TransientKind::Timeout,
                format!(
                    "connect to {} timed out after {:?}",
                    self.connector.describe(),
                    self.config.connect_timeout()
                ),
            )),
        }
    }

    async fn run_once(&self, command: &StoreCommand) -> Result<StoreReply, StoreError> {
        let backend = self.current_backend()?;
        let timeout = self.config.command_timeout();
        match tokio::time::timeout(timeout, backend.execute(command)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::transient(
                TransientKind::Timeout,
                format!("{} timed out after {timeout:?}", command.name()),
            )),
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Move to `Error` and start the bounded reconnection loop, unless one is
/// already running or the connection is terminal/closed. Returns whether a
/// loop was started.
fn handle_connection_loss(inner: &Arc<Inner>, err: &StoreError) -> bool {
    if inner.closed.load(Ordering::SeqCst) || inner.exhausted.load(Ordering::SeqCst) {
        return false;
    }
    if inner.reconnecting.swap(true, Ordering::SeqCst) {
        return false;
    }

    inner.backend.write().take();
    inner.transition(ConnectionState::Error, AuditSeverity::Warning, &err.to_string());

    let weak = Arc::downgrade(inner);
    let handle = tokio::spawn(reconnect_loop(weak));
    inner.track(handle);
    true
}

/// Start the liveness probe once per connection.
fn ensure_probe(inner: &Arc<Inner>) {
    if inner.probing.swap(true, Ordering::SeqCst) {
        return;
    }
    let probe = tokio::spawn(probe_loop(Arc::downgrade(inner)));
    inner.track(probe);
}

async fn reconnect_loop(weak: Weak<Inner>) {
    let (max_attempts, backoff) = match weak.upgrade() {
        Some(inner) => (inner.config.max_reconnect_attempts, inner.config.retry_backoff()),
        None => return,
    };

    for attempt in 1..=max_attempts {
        let delay = backoff.delay(attempt - 1);
        {
            let Some(inner) = weak.upgrade() else { return };
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            record_reconnect_attempt();
            inner.transition(
                ConnectionState::Reconnecting,
                AuditSeverity::Info,
                &format!("attempt {attempt}/{max_attempts}"),
            );
            inner.audit.emit(
                AuditEvent::new(
                    AuditEventKind::ReconnectAttempt,
                    AuditSeverity::Warning,
                    COMPONENT,
                    format!("reconnect attempt {attempt} of {max_attempts}"),
                )
                .with_field("attempt", attempt)
                .with_field("max_attempts", max_attempts)
                .with_field("delay_ms", u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
            );
        }

        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else { return };
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        inner.transition(ConnectionState::Connecting, AuditSeverity::Info, "reconnecting");

        match inner.open().await {
            Ok(backend) => {
                *inner.backend.write() = Some(backend);
                inner.transition(
                    ConnectionState::Connected,
                    AuditSeverity::Info,
                    &format!("reconnected after {attempt} attempt(s)"),
                );
                inner.reconnecting.store(false, Ordering::SeqCst);
                ensure_probe(&inner);
                return;
            }
            Err(err) => {
                debug!(attempt, error = %err, "reconnect attempt failed");
                inner.transition(ConnectionState::Error, AuditSeverity::Warning, &err.to_string());
            }
        }
    }

    let Some(inner) = weak.upgrade() else { return };
    inner.exhausted.store(true, Ordering::SeqCst);
    inner.reconnecting.store(false, Ordering::SeqCst);
    error!(
        attempts = max_attempts,
        store = %inner.connector.describe(),
        "cache reconnection exhausted; connection is terminal"
    );
    inner.audit.emit(
        AuditEvent::new(
            AuditEventKind::ReconnectExhausted,
            AuditSeverity::Critical,
            COMPONENT,
            format!("reconnection exhausted after {max_attempts} attempts"),
        )
        .with_field("attempts", max_attempts)
        .with_field("target", inner.connector.describe()),
    );
}

async fn probe_loop(weak: Weak<Inner>) {
    let period = match weak.upgrade() {
        Some(inner) => inner.config.health_check_interval(),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { return };
        if inner.closed.load(Ordering::SeqCst) || inner.exhausted.load(Ordering::SeqCst) {
            return;
        }
        if inner.state() != ConnectionState::Connected {
            continue;
        }
        if let Err(err) = probe_once(&inner).await {
            debug!(error = %err, "liveness probe failed");
        }
    }
}

async fn probe_once(inner: &Arc<Inner>) -> Result<(), StoreError> {
    match inner.run_once(&StoreCommand::Ping).await {
        Ok(StoreReply::Pong) => Ok(()),
        Ok(other) => Err(StoreError::UnexpectedReply {
            command: "PING",
            reply: format!("{other:?}"),
        }),
        Err(err) => {
            if matches!(err, StoreError::NotConnected | StoreError::ReconnectExhausted { .. }) {
                return Err(err);
            }
            inner.audit.emit(
                AuditEvent::new(
                    AuditEventKind::HealthProbeFailed,
                    AuditSeverity::Warning,
                    COMPONENT,
                    "liveness probe failed",
                )
                .with_field("error", err.to_string()),
            );
            handle_connection_loss(inner, &err);
            Err(err)
        }
    }
}

/// Connection to the shared store with retries, health probing and bounded
/// reconnection.
///
/// Cheap to clone; clones share the same state machine.
#[derive(Clone)]
pub struct CacheConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for CacheConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConnection")
            .field("target", &self.inner.connector.describe())
            .field("state", &self.state())
            .field("terminal", &self.is_terminal())
            .finish_non_exhaustive()
    }
}

impl CacheConnection {
    /// Create a disconnected connection. Call [`Self::initialize`] to connect.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        connector: Arc<dyn BackendConnector>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                audit,
                backend: RwLock::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                reconnecting: AtomicBool::new(false),
                probing: AtomicBool::new(false),
                exhausted: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Build the configured connector and connect.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] for an incomplete target and
    /// [`StoreError::ConnectFailed`] when the store cannot be reached.
    pub async fn connect(config: CacheConfig, audit: Arc<dyn AuditSink>) -> Result<Self, StoreError> {
        let connector = build_connector(&config)?;
        let connection = Self::new(config, connector, audit);
        connection.initialize().await?;
        Ok(connection)
    }

    /// Perform the initial connect and start the liveness probe.
    ///
    /// No reconnection is attempted if this fails; call [`Self::reconnect`]
    /// to keep trying in the background.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectFailed`] when the setup attempt fails.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::NotConnected);
        }

        let target = inner.connector.describe();
        inner.transition(ConnectionState::Connecting, AuditSeverity::Info, &target);

        match inner.open().await {
            Ok(backend) => {
                let topology = backend.topology();
                *inner.backend.write() = Some(backend);
                inner.transition(ConnectionState::Connected, AuditSeverity::Info, &target);
                info!(store = %target, ?topology, "cache connection established");

                ensure_probe(inner);
                Ok(())
            }
            Err(err) => {
                inner.transition(
                    ConnectionState::Error,
                    AuditSeverity::Critical,
                    &format!("initial connect to {target} failed: {err}"),
                );
                error!(store = %target, error = %err, "initial cache connection failed");
                Err(StoreError::ConnectFailed(err.to_string()))
            }
        }
    }

    /// Live backend handle; `None` unless connected.
    #[must_use]
    pub fn client(&self) -> Option<Arc<dyn KvBackend>> {
        self.inner.current_backend().ok()
    }

    /// Snapshot of the current state, for diagnostics.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state().is_healthy()
    }

    /// Whether reconnection has been exhausted.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.exhausted.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Topology of the live backend, if connected.
    #[must_use]
    pub fn topology(&self) -> Option<Topology> {
        self.client().map(|backend| backend.topology())
    }

    /// Apply the configured key prefix.
    #[must_use]
    pub fn key(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.inner.config.key_prefix)
    }

    /// Execute with the configured retry budget.
    ///
    /// # Errors
    ///
    /// See [`Self::execute_with_retries`].
    pub async fn execute(&self, command: &StoreCommand) -> Result<StoreReply, StoreError> {
        self.execute_with_retries(command, self.inner.config.command_retries)
            .await
    }

    /// Execute, retrying transient failures up to `retries` times with
    /// jittered exponential backoff.
    ///
    /// # Errors
    ///
    /// Non-transient errors are returned immediately. A terminal connection
    /// returns [`StoreError::ReconnectExhausted`]; a connection mid-reconnect
    /// returns [`StoreError::NotConnected`]. Both fail fast.
    pub async fn execute_with_retries(
        &self,
        command: &StoreCommand,
        retries: u32,
    ) -> Result<StoreReply, StoreError> {
        let backoff = self.inner.config.retry_backoff();
        let mut attempt = 0;

        loop {
            match self.inner.run_once(command).await {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_transient() && attempt < retries => {
                    let delay = backoff.delay(attempt);
                    if let Some(kind) = err.transient_kind() {
                        record_store_retry(kind.as_str());
                    }
                    warn!(
                        command = command.name(),
                        attempt = attempt + 1,
                        retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_connection_loss() {
                        handle_connection_loss(&self.inner, &err);
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Run one liveness probe now.
    ///
    /// # Errors
    ///
    /// Returns the probe failure; a failed probe on a connected backend also
    /// starts reconnection.
    pub async fn probe(&self) -> Result<(), StoreError> {
        probe_once(&self.inner).await
    }

    /// Start the bounded reconnection loop in the background, typically
    /// after a failed [`Self::initialize`]. The connection then either
    /// recovers or becomes terminal.
    ///
    /// Returns `false` without doing anything when the connection is
    /// connected, already reconnecting, terminal or closed.
    pub fn reconnect(&self) -> bool {
        let inner = &self.inner;
        if inner.state() == ConnectionState::Connected {
            return false;
        }
        handle_connection_loss(
            inner,
            &StoreError::ConnectFailed(format!("{} unavailable", inner.connector.describe())),
        )
    }

    /// Stop background tasks and move to `Disconnected`.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.abort_tasks();
        inner.backend.write().take();
        inner.reconnecting.store(false, Ordering::SeqCst);
        inner.probing.store(false, Ordering::SeqCst);
        inner.transition(ConnectionState::Disconnected, AuditSeverity::Info, "closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_projection() {
        assert!(ConnectionState::Connected.is_healthy());
        assert!(!ConnectionState::Reconnecting.is_healthy());
        assert!(!ConnectionState::Error.is_healthy());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_build_connector_for_memory() {
        let connector = build_connector(&CacheConfig::memory()).unwrap();
        assert_eq!(connector.describe(), "memory://in-process");
    }

    #[test]
    fn test_build_connector_rejects_missing_url() {
        assert!(matches!(
            build_connector(&CacheConfig::default()),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_key_prefix() {
        let connection = CacheConnection::new(
            CacheConfig::memory().with_key_prefix("t:"),
            Arc::new(MemoryConnector::default()),
            Arc::new(tollgate_telemetry::NoopAuditSink),
        );
        assert_eq!(connection.key("behavior:a:b"), "t:behavior:a:b");
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.client().is_none());
    }
}
