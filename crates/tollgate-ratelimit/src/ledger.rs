//! Behavior ledger: per-(caller, endpoint) request history and risk score.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tollgate_store::{CacheConnection, StoreCommand, StoreError, StoreReply};
use tracing::warn;

use crate::samples::SampleWindow;

/// Hourly request buckets kept per record.
pub const HOURLY_BUCKETS: usize = 24;

/// Error-rate and response-time samples kept per record.
pub const TREND_SAMPLES: usize = 100;

/// Current persisted schema version.
pub const LEDGER_VERSION: u32 = 1;

/// Key shared by all callers of an endpoint that is not per-caller scoped.
pub const SHARED_CALLER: &str = "*";

const RISK_ERROR_WEIGHT: f64 = 50.0;
const RISK_RESPONSE_MAX: f64 = 20.0;
const RISK_VOLUME_MAX: f64 = 30.0;
const SLOW_RESPONSE_MS: f64 = 1_000.0;
const VERY_SLOW_RESPONSE_MS: f64 = 3_000.0;

/// Classification derived from the risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorPattern {
    #[default]
    Normal,
    Suspicious,
    Malicious,
}

impl BehaviorPattern {
    /// `> 70` Malicious, `> 40` Suspicious, otherwise Normal.
    #[must_use]
    pub fn from_risk(score: f64) -> Self {
        if score > 70.0 {
            Self::Malicious
        } else if score > 40.0 {
            Self::Suspicious
        } else {
            Self::Normal
        }
    }

    /// Flat penalty added to the next risk score.
    #[must_use]
    pub const fn risk_penalty(self) -> f64 {
        match self {
            Self::Normal => 0.0,
            Self::Suspicious => 20.0,
            Self::Malicious => 50.0,
        }
    }

    /// Factor applied to the behavior multiplier.
    #[must_use]
    pub const fn limit_factor(self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Suspicious => 0.7,
            Self::Malicious => 0.3,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Suspicious => "suspicious",
            Self::Malicious => "malicious",
        }
    }
}

/// Requests seen during one wall-clock hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyBucket {
    /// Hours since the Unix epoch.
    pub hour: i64,
    pub count: u32,
}

fn unix_hour(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(3_600)
}

/// Per-(caller, endpoint) behavior history.
///
/// Absent records are default-initialized: all counters zero, no last
/// request, Normal pattern.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorRecord {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub average_response_time_ms: f64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub risk_score: f64,
    pub behavior_pattern: BehaviorPattern,
    pub hourly_requests: SampleWindow<HourlyBucket, HOURLY_BUCKETS>,
    pub error_rate_samples: SampleWindow<f64, TREND_SAMPLES>,
    pub response_time_samples: SampleWindow<f64, TREND_SAMPLES>,
}

impl BehaviorRecord {
    /// `error_count / request_count`, 0 for a fresh record.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        (self.error_count as f64 / self.request_count as f64).clamp(0.0, 1.0)
    }

    /// Time since the last request, `None` for a never-seen caller.
    /// A timestamp in the future counts as zero.
    #[must_use]
    pub fn since_last_request(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_request_at
            .map(|last| (now - last).to_std().unwrap_or(Duration::ZERO))
    }

    /// Requests counted in the bucket for the hour containing `now`.
    #[must_use]
    pub fn current_hour_volume(&self, now: DateTime<Utc>) -> u32 {
        let hour = unix_hour(now);
        self.hourly_requests
            .latest()
            .filter(|bucket| bucket.hour == hour)
            .map_or(0, |bucket| bucket.count)
    }

    /// Fold one request into the record and recompute risk.
    ///
    /// The pattern penalty uses the pattern from before this update, so a
    /// pattern change takes effect one request later.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_request(
        &mut self,
        allowed: bool,
        response_time_ms: f64,
        now: DateTime<Utc>,
        hourly_baseline: u32,
    ) {
        let sample = if response_time_ms.is_finite() {
            response_time_ms.max(0.0)
        } else {
            0.0
        };

        self.request_count = self.request_count.saturating_add(1);
        if allowed {
            self.success_count = self.success_count.saturating_add(1);
        } else {
            self.error_count = self.error_count.saturating_add(1);
        }

        let n = self.request_count as f64;
        self.average_response_time_ms = self.average_response_time_ms.mul_add(n - 1.0, sample) / n;
        self.last_request_at = Some(now);

        let hour = unix_hour(now);
        match self.hourly_requests.latest_mut() {
            Some(bucket) if bucket.hour == hour => bucket.count = bucket.count.saturating_add(1),
            _ => self.hourly_requests.push(HourlyBucket { hour, count: 1 }),
        }
        self.error_rate_samples.push(self.error_rate());
        self.response_time_samples.push(sample);

        self.risk_score = self.compute_risk(now, hourly_baseline);
        self.behavior_pattern = BehaviorPattern::from_risk(self.risk_score);
    }

    /// Weighted risk: error rate (0..50), slow responses (0..20), hourly
    /// volume above baseline (0..30) and the current pattern penalty,
    /// clamped to 0..100.
    #[must_use]
    pub fn compute_risk(&self, now: DateTime<Utc>, hourly_baseline: u32) -> f64 {
        let error = self.error_rate() * RISK_ERROR_WEIGHT;
        let response = response_penalty(self.average_response_time_ms);
        let volume = volume_penalty(self.current_hour_volume(now), hourly_baseline);
        let pattern = self.behavior_pattern.risk_penalty();

        (error + response + volume + pattern).clamp(0.0, 100.0)
    }
}

fn response_penalty(average_ms: f64) -> f64 {
    let excess = (average_ms - SLOW_RESPONSE_MS) / (VERY_SLOW_RESPONSE_MS - SLOW_RESPONSE_MS);
    (excess * RISK_RESPONSE_MAX).clamp(0.0, RISK_RESPONSE_MAX)
}

fn volume_penalty(volume: u32, baseline: u32) -> f64 {
    if baseline == 0 {
        return 0.0;
    }
    let baseline = f64::from(baseline);
    let excess = (f64::from(volume) - baseline) / baseline;
    (excess * RISK_VOLUME_MAX).clamp(0.0, RISK_VOLUME_MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Ledger persistence errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ledger payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unsupported ledger version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct LedgerEnvelope<R> {
    version: u32,
    record: R,
}

/// Encode a record in the current envelope.
///
/// # Errors
///
/// Returns [`LedgerError::Codec`] if serialization fails.
pub fn encode_record(record: &BehaviorRecord) -> Result<String, LedgerError> {
    Ok(serde_json::to_string(&LedgerEnvelope {
        version: LEDGER_VERSION,
        record,
    })?)
}

/// Decode an envelope, checking the version before the record.
///
/// # Errors
///
/// Returns [`LedgerError::UnsupportedVersion`] for other versions and
/// [`LedgerError::Codec`] for malformed payloads.
pub fn decode_record(payload: &str) -> Result<BehaviorRecord, LedgerError> {
    let probe: VersionProbe = serde_json::from_str(payload)?;
    if probe.version != LEDGER_VERSION {
        return Err(LedgerError::UnsupportedVersion(probe.version));
    }
    let envelope: LedgerEnvelope<BehaviorRecord> = serde_json::from_str(payload)?;
    Ok(envelope.record)
}

/// Reads and writes behavior records through the cache connection.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    connection: CacheConnection,
    ttl: Duration,
}

impl LedgerStore {
    #[must_use]
    pub const fn new(connection: CacheConnection, ttl: Duration) -> Self {
        Self { connection, ttl }
    }

    #[must_use]
    pub const fn connection(&self) -> &CacheConnection {
        &self.connection
    }

    #[must_use]
    pub fn key(&self, caller_id: &str, endpoint: &str) -> String {
        self.connection
            .key(&format!("behavior:{endpoint}:{caller_id}"))
    }

    /// Load a record. Missing keys and undecodable payloads yield the default.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the store cannot be read.
    pub async fn load(&self, caller_id: &str, endpoint: &str) -> Result<BehaviorRecord, LedgerError> {
        let key = self.key(caller_id, endpoint);
        let reply = self.connection.execute(&StoreCommand::get(key.clone())).await?;

        let Some(payload) = reply.into_value() else {
            return Ok(BehaviorRecord::default());
        };
        match decode_record(&payload) {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(key = %key, error = %err, "discarding unreadable behavior record");
                Ok(BehaviorRecord::default())
            }
        }
    }

    /// Persist a record, refreshing its TTL.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the write fails.
    pub async fn save(
        &self,
        caller_id: &str,
        endpoint: &str,
        record: &BehaviorRecord,
    ) -> Result<(), LedgerError> {
        let payload = encode_record(record)?;
        let key = self.key(caller_id, endpoint);
        self.connection
            .execute(&StoreCommand::set_with_ttl(key, payload, self.ttl))
            .await?;
        Ok(())
    }

    /// Delete a record. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the delete fails.
    pub async fn delete(&self, caller_id: &str, endpoint: &str) -> Result<bool, LedgerError> {
        let key = self.key(caller_id, endpoint);
        let reply = self.connection.execute(&StoreCommand::del(key)).await?;
        Ok(reply.as_integer().is_some_and(|n| n > 0))
    }
}
