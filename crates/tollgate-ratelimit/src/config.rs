//! Limit configuration: per-endpoint base limits and global adaptive bounds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Static limit for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointLimitConfig {
    /// Fixed window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per window.
    pub max_requests: u32,

    /// Extra allowance added to `max_requests` to form the base limit.
    pub burst: u32,

    /// Apply behavior-based adjustment (static limit otherwise).
    pub adaptive: bool,

    /// Callers of this endpoint get partial bypass.
    pub bypass_eligible: bool,

    /// Keep one ledger per caller. When false all callers share one ledger.
    pub per_caller_scoped: bool,
}

impl Default for EndpointLimitConfig {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

impl EndpointLimitConfig {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            max_requests,
            burst: 0,
            adaptive: true,
            bypass_eligible: false,
            per_caller_scoped: true,
        }
    }

    #[must_use]
    pub const fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    #[must_use]
    pub const fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    #[must_use]
    pub const fn with_bypass_eligible(mut self, eligible: bool) -> Self {
        self.bypass_eligible = eligible;
        self
    }

    #[must_use]
    pub const fn with_per_caller_scoped(mut self, scoped: bool) -> Self {
        self.per_caller_scoped = scoped;
        self
    }

    /// `max_requests + burst`, saturating.
    #[must_use]
    pub const fn base_limit(&self) -> u32 {
        self.max_requests.saturating_add(self.burst)
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Per-endpoint configurations plus the fallback for unconfigured endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointTable {
    pub default: EndpointLimitConfig,
    pub endpoints: BTreeMap<String, EndpointLimitConfig>,
}

impl EndpointTable {
    #[must_use]
    pub fn new(default: EndpointLimitConfig) -> Self {
        Self {
            default,
            endpoints: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>, config: EndpointLimitConfig) -> Self {
        self.endpoints.insert(endpoint.into(), config);
        self
    }

    /// Configuration for `endpoint`, or the default.
    #[must_use]
    pub fn resolve(&self, endpoint: &str) -> &EndpointLimitConfig {
        self.endpoints.get(endpoint).unwrap_or(&self.default)
    }

    /// Names of endpoints flagged bypass-eligible.
    pub fn bypass_endpoints(&self) -> impl Iterator<Item = &str> {
        self.endpoints
            .iter()
            .filter(|(_, config)| config.bypass_eligible)
            .map(|(name, _)| name.as_str())
    }
}

/// Inclusive bounds on the adjusted limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitBounds {
    pub min: u32,
    pub max: u32,
}

impl LimitBounds {
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Round half away from zero, then clamp. NaN clamps to `min`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn clamp(&self, value: f64) -> u32 {
        let min = f64::from(self.min);
        let max = f64::from(self.max);
        if value.is_nan() {
            return self.min;
        }
        value.round().max(min).min(max) as u32
    }
}

/// Global adaptive limiting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// When false every endpoint uses its static base limit.
    pub enabled: bool,

    pub min_limit: u32,
    pub max_limit: u32,

    /// Ledger time-to-live, refreshed on every write.
    pub ledger_ttl_secs: u64,

    /// Requests per hour considered normal volume for the risk score.
    pub hourly_volume_baseline: u32,

    /// Base-limit multiplier for partially trusted callers.
    pub partial_bypass_multiplier: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_limit: 10,
            max_limit: 10_000,
            ledger_ttl_secs: 86_400,
            hourly_volume_baseline: 1_000,
            partial_bypass_multiplier: 2.0,
        }
    }
}

impl AdaptiveConfig {
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_limit = min;
        self.max_limit = max;
        self
    }

    #[must_use]
    pub const fn bounds(&self) -> LimitBounds {
        LimitBounds::new(self.min_limit, self.max_limit)
    }

    #[must_use]
    pub const fn ledger_ttl(&self) -> Duration {
        Duration::from_secs(self.ledger_ttl_secs)
    }
}
