//! The admission pipeline: trust first, then the adaptive limiter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tollgate_ratelimit::{AdaptiveLimiter, HeaderSynthesizer, LimitRequest, RateDecision};
use tollgate_store::{BackendConnector, CacheConnection, StoreError, build_connector};
use tollgate_telemetry::{AuditEvent, AuditEventKind, AuditSeverity, AuditSink, mask_caller_id};
use tollgate_trust::{SharedTrustEvaluator, TrustCheck, TrustConfig, TrustError, TrustEvaluator};
use tracing::{debug, error, info};

use crate::config::{AdmissionConfig, ConfigError};

const COMPONENT: &str = "admission";

/// Startup errors.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One incoming request, as identified upstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionRequest<'a> {
    pub caller_id: &'a str,
    pub endpoint: &'a str,
    /// Caller address as received; malformed values are untrusted.
    pub ip: &'a str,
    /// Requests already counted in the current window, excluding this one.
    pub current_window_count: u32,
    pub response_time_ms: Option<f64>,
}

impl<'a> AdmissionRequest<'a> {
    #[must_use]
    pub const fn new(
        caller_id: &'a str,
        endpoint: &'a str,
        ip: &'a str,
        current_window_count: u32,
    ) -> Self {
        Self {
            caller_id,
            endpoint,
            ip,
            current_window_count,
            response_time_ms: None,
        }
    }

    #[must_use]
    pub const fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }
}

/// Trust evaluator, limiter and header synthesizer wired together.
#[derive(Debug, Clone)]
pub struct Admission {
    trust: Arc<SharedTrustEvaluator>,
    limiter: AdaptiveLimiter,
    connection: CacheConnection,
}

impl Admission {
    /// Wire the pipeline around an existing connection.
    ///
    /// Endpoints flagged `bypass_eligible` are added to the trust
    /// evaluator's bypass endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Trust`] if a trusted entry fails to parse.
    pub fn new(config: &AdmissionConfig, connection: CacheConnection) -> Result<Self, AdmissionError> {
        let trust = TrustEvaluator::from_config(&TrustConfig {
            bypass_endpoints: config.bypass_endpoints(),
            ..config.trust.clone()
        })?;
        let limiter = AdaptiveLimiter::new(
            config.adaptive.clone(),
            config.limits.clone(),
            connection.clone(),
            HeaderSynthesizer::new(config.headers.clone()),
        );
        Ok(Self {
            trust: Arc::new(trust.into()),
            limiter,
            connection,
        })
    }

    /// Validate the configuration, connect to the store and wire the pipeline.
    ///
    /// An unreachable store does not fail startup. Reconnection starts in
    /// the background and decisions fall back to static limits until the
    /// store is back, or for good once reconnection is exhausted.
    ///
    /// # Errors
    ///
    /// Configuration failures are reported to `audit` as critical and
    /// returned.
    pub async fn start(config: AdmissionConfig, audit: Arc<dyn AuditSink>) -> Result<Self, AdmissionError> {
        validate_or_report(&config, audit.as_ref())?;

        let connector = match build_connector(&config.cache) {
            Ok(connector) => connector,
            Err(err) => {
                report_config_failure(audit.as_ref(), &err.to_string(), Some("cache"));
                return Err(err.into());
            }
        };

        Self::connect_and_wire(config, connector, audit).await
    }

    /// [`Self::start`] with a caller-supplied store connector; `config.cache`
    /// still supplies timeouts, backoff and the key prefix.
    ///
    /// # Errors
    ///
    /// Configuration failures are reported to `audit` as critical and
    /// returned.
    pub async fn start_with_connector(
        config: AdmissionConfig,
        connector: Arc<dyn BackendConnector>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, AdmissionError> {
        validate_or_report(&config, audit.as_ref())?;
        Self::connect_and_wire(config, connector, audit).await
    }

    async fn connect_and_wire(
        config: AdmissionConfig,
        connector: Arc<dyn BackendConnector>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, AdmissionError> {
        let connection = CacheConnection::new(config.cache.clone(), connector, audit);
        if let Err(err) = connection.initialize().await {
            error!(error = %err, "store unavailable at startup, serving static limits");
            connection.reconnect();
        }

        let admission = Self::new(&config, connection)?;
        info!(
            endpoints = config.limits.endpoints.len(),
            trusted = config.trust.trusted.len(),
            adaptive = config.adaptive.enabled,
            "admission control started"
        );
        Ok(admission)
    }

    /// Decide a request.
    pub async fn check(&self, request: &AdmissionRequest<'_>) -> RateDecision {
        self.check_at(request, Utc::now()).await
    }

    /// Decide a request against an explicit clock reading.
    ///
    /// Fully trusted callers short-circuit the ledger. Everyone else goes
    /// through the adaptive limiter, partial trust with a raised base limit.
    pub async fn check_at(&self, request: &AdmissionRequest<'_>, now: DateTime<Utc>) -> RateDecision {
        let trust = self.trust.check_trust(request.ip, Some(request.endpoint));

        if let Some(decision) = self.limiter.bypass_decision(
            request.endpoint,
            request.current_window_count,
            trust.level,
            now,
        ) {
            debug!(
                caller = %mask_caller_id(request.caller_id),
                endpoint = request.endpoint,
                level = %trust.level,
                allowed = decision.allowed,
                "trust bypass applied"
            );
            return decision;
        }

        let limit_request = LimitRequest {
            caller_id: request.caller_id,
            endpoint: request.endpoint,
            current_window_count: request.current_window_count,
            response_time_ms: request.response_time_ms,
            trust_level: trust.level,
        };
        self.limiter.check_at(&limit_request, now).await
    }

    /// Trust evaluation alone.
    #[must_use]
    pub fn check_trust(&self, ip: &str, endpoint: Option<&str>) -> TrustCheck {
        self.trust.check_trust(ip, endpoint)
    }

    /// Shared evaluator, for runtime changes to the trusted entries.
    #[must_use]
    pub fn trust(&self) -> &SharedTrustEvaluator {
        &self.trust
    }

    #[must_use]
    pub const fn limiter(&self) -> &AdaptiveLimiter {
        &self.limiter
    }

    #[must_use]
    pub const fn connection(&self) -> &CacheConnection {
        &self.connection
    }

    /// Stop background store tasks.
    pub fn shutdown(&self) {
        self.connection.close();
    }
}

fn validate_or_report(config: &AdmissionConfig, audit: &dyn AuditSink) -> Result<(), AdmissionError> {
    config.validate().map_err(|err| {
        report_config_failure(audit, &err.to_string(), err.field());
        AdmissionError::from(err)
    })
}

fn report_config_failure(audit: &dyn AuditSink, message: &str, field: Option<&str>) {
    error!(error = message, "invalid admission configuration");
    let mut event = AuditEvent::new(
        AuditEventKind::ConfigurationFailure,
        AuditSeverity::Critical,
        COMPONENT,
        message,
    );
    if let Some(field) = field {
        event = event.with_field("field", field);
    }
    audit.emit(event);
}
