//! Adaptive limiter.
//!
//! Combines an endpoint's static base limit with risk, behavior and recency
//! multipliers read from the behavior ledger. Store failures never surface:
//! an unreadable ledger falls back to the static limit, a lost write keeps
//! the decision.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tollgate_store::CacheConnection;
use tollgate_telemetry::mask_caller_id;
use tollgate_telemetry::metrics::record_decision;
use tollgate_trust::TrustLevel;
use tracing::{debug, warn};

use crate::config::{AdaptiveConfig, EndpointLimitConfig, EndpointTable};
use crate::decision::{DecisionReason, RateDecision};
use crate::headers::{BypassMode, HeaderSynthesizer, RenderOptions, retry_after_secs};
use crate::ledger::{BehaviorRecord, LedgerError, LedgerStore, SHARED_CALLER};
use crate::multipliers::Multipliers;

/// A single limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitRequest<'a> {
    pub caller_id: &'a str,
    pub endpoint: &'a str,
    /// Requests already counted in the current window, excluding this one.
    pub current_window_count: u32,
    /// Observed response time to fold into the ledger. Defaults to the
    /// duration of the check itself.
    pub response_time_ms: Option<f64>,
    /// Trust granted upstream. `Partial` raises the base limit by
    /// `partial_bypass_multiplier`; the ledger is still read and updated.
    pub trust_level: TrustLevel,
}

impl<'a> LimitRequest<'a> {
    #[must_use]
    pub const fn new(caller_id: &'a str, endpoint: &'a str, current_window_count: u32) -> Self {
        Self {
            caller_id,
            endpoint,
            current_window_count,
            response_time_ms: None,
            trust_level: TrustLevel::None,
        }
    }

    #[must_use]
    pub const fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }

    #[must_use]
    pub const fn with_trust_level(mut self, trust_level: TrustLevel) -> Self {
        self.trust_level = trust_level;
        self
    }
}

/// Computes per-request limits from static configuration and the ledger.
#[derive(Debug, Clone)]
pub struct AdaptiveLimiter {
    config: AdaptiveConfig,
    endpoints: EndpointTable,
    ledger: LedgerStore,
    headers: HeaderSynthesizer,
}

impl AdaptiveLimiter {
    #[must_use]
    pub fn new(
        config: AdaptiveConfig,
        endpoints: EndpointTable,
        connection: CacheConnection,
        headers: HeaderSynthesizer,
    ) -> Self {
        let ledger = LedgerStore::new(connection, config.ledger_ttl());
        Self {
            config,
            endpoints,
            ledger,
            headers,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    #[must_use]
    pub const fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    #[must_use]
    pub fn endpoint_config(&self, endpoint: &str) -> &EndpointLimitConfig {
        self.endpoints.resolve(endpoint)
    }

    #[must_use]
    pub const fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Check a request with no observed response time.
    pub async fn check_limit(
        &self,
        caller_id: &str,
        endpoint: &str,
        current_window_count: u32,
    ) -> RateDecision {
        self.check_limit_with(&LimitRequest::new(caller_id, endpoint, current_window_count))
            .await
    }

    /// Check a request carrying an optional observed response time.
    pub async fn check_limit_with(&self, request: &LimitRequest<'_>) -> RateDecision {
        self.check_at(request, Utc::now()).await
    }

    /// Check against an explicit clock reading.
    pub async fn check_at(&self, request: &LimitRequest<'_>, now: DateTime<Utc>) -> RateDecision {
        let started = Instant::now();
        let endpoint_config = self.endpoints.resolve(request.endpoint);
        let base_limit = self.effective_base(endpoint_config, request.trust_level);

        if !self.config.enabled || !endpoint_config.adaptive {
            return self.static_decision(
                request,
                endpoint_config,
                DecisionReason::AdaptiveDisabled,
                now,
            );
        }

        let ledger_caller = if endpoint_config.per_caller_scoped {
            request.caller_id
        } else {
            SHARED_CALLER
        };

        let mut record = match self.ledger.load(ledger_caller, request.endpoint).await {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    endpoint = request.endpoint,
                    error = %err,
                    "behavior ledger unavailable, applying static limit"
                );
                return self.static_decision(
                    request,
                    endpoint_config,
                    DecisionReason::StoreFallback,
                    now,
                );
            }
        };

        let multipliers = Multipliers::from_record(&record, now);
        let adjusted_limit = multipliers.apply(base_limit, self.config.bounds());
        let allowed = request.current_window_count < adjusted_limit;

        let sample = request
            .response_time_ms
            .unwrap_or_else(|| started.elapsed().as_secs_f64() * 1_000.0);
        record.record_request(allowed, sample, now, self.config.hourly_volume_baseline);

        let reason = match self.ledger.save(ledger_caller, request.endpoint, &record).await {
            Ok(()) if request.trust_level == TrustLevel::Partial => DecisionReason::PartialBypass,
            Ok(()) => DecisionReason::Adaptive,
            Err(err) => {
                warn!(
                    endpoint = request.endpoint,
                    error = %err,
                    "behavior ledger write failed, decision stands"
                );
                DecisionReason::LedgerWriteFailed
            }
        };

        debug!(
            caller = %mask_caller_id(request.caller_id),
            endpoint = request.endpoint,
            allowed,
            base_limit,
            adjusted_limit,
            risk = record.risk_score,
            pattern = record.behavior_pattern.as_str(),
            reason = reason.as_str(),
            "adaptive limit decision"
        );

        self.finish(
            request,
            endpoint_config,
            allowed,
            adjusted_limit,
            reason,
            Some(multipliers),
            now,
        )
    }

    /// Decision for a caller the trust evaluator fully trusts: always
    /// allowed, no ledger I/O, the upper bound reported as the adjusted
    /// limit. Returns `None` for any other level, which must go through
    /// [`Self::check_at`].
    #[must_use]
    pub fn bypass_decision(
        &self,
        endpoint: &str,
        current_window_count: u32,
        level: TrustLevel,
        now: DateTime<Utc>,
    ) -> Option<RateDecision> {
        if level != TrustLevel::Full {
            return None;
        }

        let endpoint_config = self.endpoints.resolve(endpoint);
        let adjusted_limit = self.config.bounds().max;
        let reason = DecisionReason::FullBypass;
        let options = RenderOptions::new(now).with_bypass(BypassMode::Full);
        let headers = self.headers.render(
            current_window_count.saturating_add(1),
            adjusted_limit,
            endpoint_config.window(),
            &options,
        );

        record_decision(endpoint, true, reason.as_str(), adjusted_limit);

        Some(RateDecision {
            allowed: true,
            base_limit: endpoint_config.base_limit(),
            adjusted_limit,
            reason,
            retry_after_seconds: None,
            headers,
            trust_level: level,
            multipliers: None,
        })
    }

    /// Read the ledger without updating it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the store cannot be read.
    pub async fn behavior(&self, caller_id: &str, endpoint: &str) -> Result<BehaviorRecord, LedgerError> {
        self.ledger.load(self.ledger_caller(caller_id, endpoint), endpoint).await
    }

    /// Forget a caller's history for an endpoint. Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the store cannot be written.
    pub async fn reset_behavior(&self, caller_id: &str, endpoint: &str) -> Result<bool, LedgerError> {
        self.ledger.delete(self.ledger_caller(caller_id, endpoint), endpoint).await
    }

    fn ledger_caller<'a>(&self, caller_id: &'a str, endpoint: &str) -> &'a str {
        if self.endpoints.resolve(endpoint).per_caller_scoped {
            caller_id
        } else {
            SHARED_CALLER
        }
    }

    /// Static base limit, raised and clamped to the bounds for partial trust.
    fn effective_base(&self, endpoint_config: &EndpointLimitConfig, level: TrustLevel) -> u32 {
        let base_limit = endpoint_config.base_limit();
        if level == TrustLevel::Partial {
            self.config
                .bounds()
                .clamp(f64::from(base_limit) * self.config.partial_bypass_multiplier)
        } else {
            base_limit
        }
    }

    fn static_decision(
        &self,
        request: &LimitRequest<'_>,
        endpoint_config: &EndpointLimitConfig,
        reason: DecisionReason,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let base_limit = self.effective_base(endpoint_config, request.trust_level);
        let allowed = request.current_window_count < base_limit;
        debug!(
            caller = %mask_caller_id(request.caller_id),
            endpoint = request.endpoint,
            allowed,
            base_limit,
            reason = reason.as_str(),
            "static limit decision"
        );
        self.finish(request, endpoint_config, allowed, base_limit, reason, None, now)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        request: &LimitRequest<'_>,
        endpoint_config: &EndpointLimitConfig,
        allowed: bool,
        limit: u32,
        reason: DecisionReason,
        multipliers: Option<Multipliers>,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let window = endpoint_config.window();
        let count = if allowed {
            request.current_window_count.saturating_add(1)
        } else {
            request.current_window_count
        };
        let mut options = RenderOptions::new(now).denied(!allowed);
        if request.trust_level == TrustLevel::Partial {
            options = options.with_bypass(BypassMode::Partial);
        }
        let headers = self.headers.render(count, limit, window, &options);

        record_decision(request.endpoint, allowed, reason.as_str(), limit);

        RateDecision {
            allowed,
            base_limit: endpoint_config.base_limit(),
            adjusted_limit: limit,
            reason,
            retry_after_seconds: (!allowed).then(|| retry_after_secs(now, window)),
            headers,
            trust_level: request.trust_level,
            multipliers,
        }
    }
}
