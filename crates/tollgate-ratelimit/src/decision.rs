//! Admission decisions.

use std::fmt;

use serde::Serialize;
use tollgate_trust::TrustLevel;

use crate::headers::HeaderMap;
use crate::multipliers::Multipliers;

/// Why a decision came out the way it did. Diagnostic only; callers act on
/// [`RateDecision::allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Adjusted limit computed from the behavior ledger.
    Adaptive,
    /// Adaptive limiting is off globally or for the endpoint.
    AdaptiveDisabled,
    /// The ledger could not be read; static base limit applied.
    StoreFallback,
    /// Adaptive decision made, but the ledger update was lost.
    LedgerWriteFailed,
    /// Trusted address or range.
    FullBypass,
    /// Bypass-eligible endpoint or internal network.
    PartialBypass,
}

impl DecisionReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adaptive => "adaptive",
            Self::AdaptiveDisabled => "adaptive_disabled",
            Self::StoreFallback => "store_fallback",
            Self::LedgerWriteFailed => "ledger_write_failed",
            Self::FullBypass => "full_bypass",
            Self::PartialBypass => "partial_bypass",
        }
    }

    /// Whether the store was unavailable for part of the decision.
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::StoreFallback | Self::LedgerWriteFailed)
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an admission check. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub base_limit: u32,
    pub adjusted_limit: u32,
    pub reason: DecisionReason,
    /// Present whenever the request is denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    pub headers: HeaderMap,
    pub trust_level: TrustLevel,
    /// Multipliers used, when the adaptive path ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipliers: Option<Multipliers>,
}

impl RateDecision {
    /// HTTP status the caller should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        if self.allowed { 200 } else { 429 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_and_serialization() {
        let decision = RateDecision {
            allowed: false,
            base_limit: 10,
            adjusted_limit: 10,
            reason: DecisionReason::StoreFallback,
            retry_after_seconds: Some(12),
            headers: HeaderMap::new(),
            trust_level: TrustLevel::None,
            multipliers: None,
        };

        assert_eq!(decision.status_code(), 429);
        assert!(decision.reason.is_degraded());

        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["reason"], "store_fallback");
        assert_eq!(json["trust_level"], "none");
        assert!(json.get("multipliers").is_none());
    }
}
