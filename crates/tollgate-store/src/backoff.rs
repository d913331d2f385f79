//! Backoff schedule for store retries and reconnection.

use std::time::Duration;

/// Exponential backoff with optional jitter.
///
/// `delay(n) = min(max, initial * multiplier^n)`, then jittered into
/// `[0.5x, 1.5x)` and re-capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Initial backoff duration.
    pub initial: Duration,

    /// Maximum backoff duration.
    pub max: Duration,

    /// Multiplier for each attempt.
    pub multiplier: f64,

    /// Whether to add jitter.
    pub jitter: bool,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff (doubling, jittered).
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set the multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Store preset: 1s initial, doubling, 30s cap.
    #[must_use]
    pub const fn store_default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max.as_secs_f64();
        let capped = if base.is_finite() { base.min(max) } else { max };

        let secs = if self.jitter {
            let jitter_factor = 0.5 + rand::random::<f64>();
            (capped * jitter_factor).min(max)
        } else {
            capped
        };

        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::store_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = ExponentialBackoff::store_default().with_jitter(false);

        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(16));
        assert_eq!(backoff.delay(5), Duration::from_secs(30)); // Capped
        assert_eq!(backoff.delay(1_000), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff::store_default();

        for attempt in 0..8 {
            let unjittered = backoff.with_jitter(false).delay(attempt);
            let delay = backoff.delay(attempt);
            assert!(delay >= unjittered.mul_f64(0.5));
            assert!(delay <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_custom_multiplier() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60))
            .with_multiplier(3.0)
            .with_jitter(false);

        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(9));
        assert_eq!(backoff.delay(4), Duration::from_secs(60));
    }
}
