//! Limit multipliers derived from a behavior record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::LimitBounds;
use crate::ledger::{BehaviorPattern, BehaviorRecord};

const RISK_FLOOR: f64 = 0.1;
const IDLE_LONG: Duration = Duration::from_secs(3_600);
const IDLE_SHORT: Duration = Duration::from_secs(300);
const RAPID_FIRE: Duration = Duration::from_secs(1);

/// `max(0.1, 1 - risk/100)`, with risk clamped to 0..100.
#[must_use]
pub fn risk_multiplier(risk_score: f64) -> f64 {
    let risk = if risk_score.is_nan() {
        100.0
    } else {
        risk_score.clamp(0.0, 100.0)
    };
    (1.0 - risk / 100.0).max(RISK_FLOOR)
}

/// Error-rate and latency adjustments, then the pattern factor. Every
/// matching condition applies.
#[must_use]
pub fn behavior_multiplier(error_rate: f64, average_response_ms: f64, pattern: BehaviorPattern) -> f64 {
    let mut multiplier = 1.0;

    if error_rate > 0.5 {
        multiplier *= 0.5;
    } else if error_rate < 0.1 {
        multiplier *= 1.2;
    }

    if average_response_ms > 1_000.0 {
        multiplier *= 0.8;
    } else if average_response_ms < 100.0 {
        multiplier *= 1.1;
    }

    multiplier * pattern.limit_factor()
}

/// Idle callers earn headroom, rapid-fire callers lose some. A never-seen
/// caller counts as idle for over an hour.
#[must_use]
pub fn recency_multiplier(since_last_request: Option<Duration>) -> f64 {
    match since_last_request {
        None => 1.2,
        Some(idle) if idle > IDLE_LONG => 1.2,
        Some(idle) if idle > IDLE_SHORT => 1.1,
        Some(idle) if idle < RAPID_FIRE => 0.8,
        Some(_) => 1.0,
    }
}

/// The three multipliers applied to a base limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Multipliers {
    pub risk: f64,
    pub behavior: f64,
    pub recency: f64,
}

impl Multipliers {
    #[must_use]
    pub fn from_record(record: &BehaviorRecord, now: DateTime<Utc>) -> Self {
        Self {
            risk: risk_multiplier(record.risk_score),
            behavior: behavior_multiplier(
                record.error_rate(),
                record.average_response_time_ms,
                record.behavior_pattern,
            ),
            recency: recency_multiplier(record.since_last_request(now)),
        }
    }

    #[must_use]
    pub fn combined(&self) -> f64 {
        self.risk * self.behavior * self.recency
    }

    /// `round(base * risk * behavior * recency)` clamped to `bounds`.
    #[must_use]
    pub fn apply(&self, base_limit: u32, bounds: LimitBounds) -> u32 {
        bounds.clamp(f64::from(base_limit) * self.combined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_multiplier_floor() {
        assert_eq!(risk_multiplier(0.0), 1.0);
        assert!((risk_multiplier(80.0) - 0.2).abs() < 1e-9);
        assert_eq!(risk_multiplier(95.0), 0.1);
        assert_eq!(risk_multiplier(250.0), 0.1);
        assert_eq!(risk_multiplier(-5.0), 1.0);
    }

    #[test]
    fn test_behavior_conditions_compound() {
        let best = behavior_multiplier(0.0, 50.0, BehaviorPattern::Normal);
        assert!((best - 1.32).abs() < 1e-9);

        let worst = behavior_multiplier(0.9, 2_000.0, BehaviorPattern::Malicious);
        assert!((worst - 0.5 * 0.8 * 0.3).abs() < 1e-9);

        let neutral = behavior_multiplier(0.3, 500.0, BehaviorPattern::Suspicious);
        assert!((neutral - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_recency_boundaries() {
        assert_eq!(recency_multiplier(None), 1.2);
        assert_eq!(recency_multiplier(Some(Duration::from_secs(3_601))), 1.2);
        assert_eq!(recency_multiplier(Some(Duration::from_secs(3_600))), 1.1);
        assert_eq!(recency_multiplier(Some(Duration::from_secs(301))), 1.1);
        assert_eq!(recency_multiplier(Some(Duration::from_secs(300))), 1.0);
        assert_eq!(recency_multiplier(Some(Duration::from_secs(1))), 1.0);
        assert_eq!(recency_multiplier(Some(Duration::from_millis(999))), 0.8);
    }

    #[test]
    fn test_fresh_caller_gets_headroom() {
        let multipliers = Multipliers::from_record(&BehaviorRecord::default(), Utc::now());

        assert_eq!(multipliers.apply(100, LimitBounds::new(10, 10_000)), 158);
    }
}
