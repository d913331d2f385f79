//! Response header synthesis and validation.
//!
//! Rendering is pure: the caller supplies the clock reading in
//! [`RenderOptions`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rendered headers, keyed by header name.
pub type HeaderMap = BTreeMap<String, String>;

/// Value used for limit/remaining under full bypass.
pub const UNLIMITED: &str = "unlimited";

/// Header names. Defaults follow the common `X-RateLimit-*` convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderNames {
    pub limit: String,
    pub remaining: String,
    pub reset: String,
    pub retry_after: String,
    pub bypass: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            limit: "X-RateLimit-Limit".to_string(),
            remaining: "X-RateLimit-Remaining".to_string(),
            reset: "X-RateLimit-Reset".to_string(),
            retry_after: "Retry-After".to_string(),
            bypass: "X-RateLimit-Bypass".to_string(),
        }
    }
}

impl HeaderNames {
    /// Names that are empty, by field.
    #[must_use]
    pub fn empty_fields(&self) -> Vec<&'static str> {
        [
            ("limit", &self.limit),
            ("remaining", &self.remaining),
            ("reset", &self.reset),
            ("retry_after", &self.retry_after),
            ("bypass", &self.bypass),
        ]
        .into_iter()
        .filter(|(_, name)| name.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
    }
}

/// Trust-based bypass applied to the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassMode {
    #[default]
    None,
    Partial,
    Full,
}

impl BypassMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }
}

/// Inputs to [`HeaderSynthesizer::render`] besides the counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub now: DateTime<Utc>,
    /// The request is being rejected; adds retry-after.
    pub denied: bool,
    pub bypass: BypassMode,
}

impl RenderOptions {
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            denied: false,
            bypass: BypassMode::None,
        }
    }

    #[must_use]
    pub const fn denied(mut self, denied: bool) -> Self {
        self.denied = denied;
        self
    }

    #[must_use]
    pub const fn with_bypass(mut self, bypass: BypassMode) -> Self {
        self.bypass = bypass;
        self
    }
}

/// Header validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderValidationError {
    #[error("missing header {0}")]
    Missing(String),

    #[error("header {header} is not numeric: {value:?}")]
    NonNumeric { header: String, value: String },

    #[error("header {header} is negative: {value}")]
    Negative { header: String, value: String },

    #[error("remaining {remaining} exceeds limit {limit}")]
    RemainingExceedsLimit { remaining: u64, limit: u64 },

    #[error("header {header} is not a timestamp: {value:?}")]
    InvalidReset { header: String, value: String },

    #[error("header {header} uses the unlimited sentinel without full bypass")]
    SentinelWithoutBypass { header: String },
}

/// Unix seconds at the end of the fixed window containing `now`.
#[must_use]
pub fn window_reset_at(now: DateTime<Utc>, window: Duration) -> u64 {
    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
    let reset_ms = (now_ms / window_ms).saturating_add(1).saturating_mul(window_ms);
    reset_ms.div_ceil(1_000)
}

/// Whole seconds until the window resets, at least 1.
#[must_use]
pub fn retry_after_secs(now: DateTime<Utc>, window: Duration) -> u64 {
    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let reset_ms = window_reset_at(now, window).saturating_mul(1_000);
    reset_ms.saturating_sub(now_ms).div_ceil(1_000).max(1)
}

/// Renders and validates rate limit headers.
#[derive(Debug, Clone, Default)]
pub struct HeaderSynthesizer {
    names: HeaderNames,
}

impl HeaderSynthesizer {
    #[must_use]
    pub const fn new(names: HeaderNames) -> Self {
        Self { names }
    }

    #[must_use]
    pub const fn names(&self) -> &HeaderNames {
        &self.names
    }

    /// Render headers for a request that brings the window to `current_count`.
    ///
    /// Always emits limit, remaining and reset. Retry-after is added only when
    /// `options.denied`. Full bypass replaces limit and remaining with
    /// [`UNLIMITED`]; any bypass adds the bypass header.
    #[must_use]
    pub fn render(
        &self,
        current_count: u32,
        limit: u32,
        window: Duration,
        options: &RenderOptions,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let reset = window_reset_at(options.now, window);

        match options.bypass {
            BypassMode::Full => {
                headers.insert(self.names.limit.clone(), UNLIMITED.to_string());
                headers.insert(self.names.remaining.clone(), UNLIMITED.to_string());
            }
            BypassMode::None | BypassMode::Partial => {
                headers.insert(self.names.limit.clone(), limit.to_string());
                headers.insert(
                    self.names.remaining.clone(),
                    limit.saturating_sub(current_count).to_string(),
                );
            }
        }
        headers.insert(self.names.reset.clone(), reset.to_string());

        if options.bypass != BypassMode::None {
            headers.insert(self.names.bypass.clone(), options.bypass.as_str().to_string());
        }

        if options.denied {
            headers.insert(
                self.names.retry_after.clone(),
                retry_after_secs(options.now, window).to_string(),
            );
        }

        headers
    }

    /// Check a header set for internal consistency.
    ///
    /// # Errors
    ///
    /// Rejects missing or non-numeric limit/remaining, negative values,
    /// remaining above limit, an unparseable reset, a non-numeric
    /// retry-after, and the unlimited sentinel without a full-bypass marker.
    pub fn validate(&self, headers: &HeaderMap) -> Result<(), HeaderValidationError> {
        let full_bypass = headers
            .get(&self.names.bypass)
            .is_some_and(|v| v == BypassMode::Full.as_str());

        let limit = self.count_header(headers, &self.names.limit, full_bypass)?;
        let remaining = self.count_header(headers, &self.names.remaining, full_bypass)?;
        if let (Some(limit), Some(remaining)) = (limit, remaining) {
            if remaining > limit {
                return Err(HeaderValidationError::RemainingExceedsLimit { remaining, limit });
            }
        }

        let reset = required(headers, &self.names.reset)?;
        if !is_timestamp(reset) {
            return Err(HeaderValidationError::InvalidReset {
                header: self.names.reset.clone(),
                value: reset.to_string(),
            });
        }

        if let Some(retry) = headers.get(&self.names.retry_after) {
            parse_count(&self.names.retry_after, retry)?;
        }

        Ok(())
    }

    /// `None` for the unlimited sentinel.
    fn count_header(
        &self,
        headers: &HeaderMap,
        name: &str,
        full_bypass: bool,
    ) -> Result<Option<u64>, HeaderValidationError> {
        let value = required(headers, name)?;
        if value == UNLIMITED {
            if !full_bypass {
                return Err(HeaderValidationError::SentinelWithoutBypass {
                    header: name.to_string(),
                });
            }
            return Ok(None);
        }
        parse_count(name, value).map(Some)
    }
}

fn required<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, HeaderValidationError> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| HeaderValidationError::Missing(name.to_string()))
}

fn parse_count(name: &str, value: &str) -> Result<u64, HeaderValidationError> {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(n);
    }
    if trimmed.parse::<i64>().is_ok_and(|n| n < 0) {
        return Err(HeaderValidationError::Negative {
            header: name.to_string(),
            value: value.to_string(),
        });
    }
    Err(HeaderValidationError::NonNumeric {
        header: name.to_string(),
        value: value.to_string(),
    })
}

/// Unix seconds or RFC 3339.
fn is_timestamp(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.parse::<u64>().is_ok() || DateTime::parse_from_rfc3339(trimmed).is_ok()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_window_reset_and_retry_after() {
        let window = Duration::from_secs(60);
        let now = at_ms(1_700_000_010_500);

        assert_eq!(window_reset_at(now, window), 1_700_000_040);
        assert_eq!(retry_after_secs(now, window), 30);

        let edge = at_ms(1_700_000_039_900);
        assert_eq!(retry_after_secs(edge, window), 1);
    }

    #[test]
    fn test_render_allowed() {
        let synth = HeaderSynthesizer::default();
        let options = RenderOptions::new(at_ms(1_700_000_010_500));
        let rendered = synth.render(41, 100, Duration::from_secs(60), &options);

        assert_eq!(rendered["X-RateLimit-Limit"], "100");
        assert_eq!(rendered["X-RateLimit-Remaining"], "59");
        assert_eq!(rendered["X-RateLimit-Reset"], "1700000040");
        assert!(!rendered.contains_key("Retry-After"));
        assert!(!rendered.contains_key("X-RateLimit-Bypass"));
        assert_eq!(synth.validate(&rendered), Ok(()));
    }

    #[test]
    fn test_render_denied_has_retry_after() {
        let synth = HeaderSynthesizer::default();
        let options = RenderOptions::new(at_ms(1_700_000_010_500)).denied(true);
        let rendered = synth.render(150, 100, Duration::from_secs(60), &options);

        assert_eq!(rendered["X-RateLimit-Remaining"], "0");
        assert_eq!(rendered["Retry-After"], "30");
        assert_eq!(synth.validate(&rendered), Ok(()));
    }

    #[test]
    fn test_render_bypass_modes() {
        let synth = HeaderSynthesizer::default();
        let now = at_ms(1_700_000_000_000);

        let full = synth.render(
            5,
            100,
            Duration::from_secs(60),
            &RenderOptions::new(now).with_bypass(BypassMode::Full),
        );
        assert_eq!(full["X-RateLimit-Limit"], UNLIMITED);
        assert_eq!(full["X-RateLimit-Remaining"], UNLIMITED);
        assert_eq!(full["X-RateLimit-Bypass"], "full");
        assert_eq!(synth.validate(&full), Ok(()));

        let partial = synth.render(
            5,
            200,
            Duration::from_secs(60),
            &RenderOptions::new(now).with_bypass(BypassMode::Partial),
        );
        assert_eq!(partial["X-RateLimit-Limit"], "200");
        assert_eq!(partial["X-RateLimit-Bypass"], "partial");
        assert_eq!(synth.validate(&partial), Ok(()));
    }

    #[test]
    fn test_custom_names() {
        let synth = HeaderSynthesizer::new(HeaderNames {
            limit: "RateLimit-Limit".into(),
            ..HeaderNames::default()
        });
        let rendered = synth.render(
            1,
            10,
            Duration::from_secs(1),
            &RenderOptions::new(at_ms(0)),
        );

        assert_eq!(rendered["RateLimit-Limit"], "10");
        assert!(HeaderNames::default().empty_fields().is_empty());
    }

    #[test]
    fn test_validate_rejections() {
        let synth = HeaderSynthesizer::default();
        let base = [
            ("X-RateLimit-Limit", "10"),
            ("X-RateLimit-Remaining", "5"),
            ("X-RateLimit-Reset", "1700000000"),
        ];

        let mut h = headers(&base);
        h.insert("X-RateLimit-Remaining".into(), "11".into());
        assert_eq!(
            synth.validate(&h),
            Err(HeaderValidationError::RemainingExceedsLimit {
                remaining: 11,
                limit: 10
            })
        );

        let mut h = headers(&base);
        h.insert("X-RateLimit-Limit".into(), "ten".into());
        assert!(matches!(
            synth.validate(&h),
            Err(HeaderValidationError::NonNumeric { .. })
        ));

        let mut h = headers(&base);
        h.insert("X-RateLimit-Remaining".into(), "-1".into());
        assert!(matches!(
            synth.validate(&h),
            Err(HeaderValidationError::Negative { .. })
        ));

        let mut h = headers(&base);
        h.insert("X-RateLimit-Reset".into(), "tomorrow".into());
        assert!(matches!(
            synth.validate(&h),
            Err(HeaderValidationError::InvalidReset { .. })
        ));

        let mut h = headers(&base);
        h.insert("X-RateLimit-Reset".into(), "2026-10-19T12:00:00Z".into());
        assert_eq!(synth.validate(&h), Ok(()));

        let mut h = headers(&base);
        h.insert("X-RateLimit-Limit".into(), UNLIMITED.into());
        assert!(matches!(
            synth.validate(&h),
            Err(HeaderValidationError::SentinelWithoutBypass { .. })
        ));

        let mut h = headers(&base);
        h.remove("X-RateLimit-Reset");
        assert_eq!(
            synth.validate(&h),
            Err(HeaderValidationError::Missing("X-RateLimit-Reset".into()))
        );

        let mut h = headers(&base);
        h.insert("Retry-After".into(), "soon".into());
        assert!(matches!(
            synth.validate(&h),
            Err(HeaderValidationError::NonNumeric { .. })
        ));
    }
}
