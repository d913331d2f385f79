//! Store connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ExponentialBackoff;

/// Which backend a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Redis, standalone or cluster.
    #[default]
    Redis,
    /// In-process store (single node, tests).
    Memory,
}

/// Cluster topology settings. Presence switches the Redis backend to cluster mode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Seed node URLs (`redis://host:port`).
    pub nodes: Vec<String>,

    /// Route read-only commands to replicas.
    pub read_from_replicas: bool,
}

/// Configuration for [`crate::CacheConnection`].
///
/// Durations are expressed in milliseconds so the struct maps directly onto TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: BackendKind,

    /// Standalone Redis URL. Required for the Redis backend without `cluster`.
    pub url: Option<String>,

    /// Prefix prepended to every key.
    pub key_prefix: String,

    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,

    /// Default retry budget for transient command errors.
    pub command_retries: u32,

    /// First backoff step for retries and reconnects.
    pub retry_base_ms: u64,

    /// Backoff cap.
    pub retry_max_ms: u64,

    /// Reconnection attempts before the connection becomes terminal.
    pub max_reconnect_attempts: u32,

    /// Interval of the liveness probe.
    pub health_check_interval_ms: u64,

    pub cluster: Option<ClusterConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Redis,
            url: None,
            key_prefix: "tollgate:".to_string(),
            connect_timeout_ms: 5_000,
            command_timeout_ms: 2_000,
            command_retries: 3,
            retry_base_ms: 1_000,
            retry_max_ms: 30_000,
            max_reconnect_attempts: 10,
            health_check_interval_ms: 30_000,
            cluster: None,
        }
    }
}

impl CacheConfig {
    /// Standalone Redis at `url`.
    #[must_use]
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Redis cluster seeded from `nodes`.
    #[must_use]
    pub fn redis_cluster(nodes: Vec<String>) -> Self {
        Self {
            cluster: Some(ClusterConfig {
                nodes,
                read_from_replicas: false,
            }),
            ..Self::default()
        }
    }

    /// In-process backend.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    /// Set the key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the retry/reconnect backoff bounds.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_ms = millis(base);
        self.retry_max_ms = millis(max);
        self
    }

    /// Set the reconnection budget.
    #[must_use]
    pub const fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the liveness probe interval.
    #[must_use]
    pub const fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval_ms = millis(interval);
        self
    }

    /// Set the default retry budget.
    #[must_use]
    pub const fn with_command_retries(mut self, retries: u32) -> Self {
        self.command_retries = retries;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Backoff schedule shared by command retries and reconnects.
    #[must_use]
    pub const fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }

    /// Whether cluster mode is configured.
    #[must_use]
    pub const fn is_cluster(&self) -> bool {
        self.cluster.is_some()
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_store_schedule() {
        let config = CacheConfig::default();

        assert_eq!(config.command_retries, 3);
        assert_eq!(config.retry_backoff().initial, Duration::from_secs(1));
        assert_eq!(config.retry_backoff().max, Duration::from_secs(30));
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
        assert!(!config.is_cluster());
    }

    #[test]
    fn test_builders() {
        let config = CacheConfig::memory()
            .with_key_prefix("t:")
            .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
            .with_max_reconnect_attempts(2)
            .with_health_check_interval(Duration::from_millis(50));

        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.key_prefix, "t:");
        assert_eq!(config.retry_base_ms, 5);
        assert_eq!(config.retry_max_ms, 20);
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.health_check_interval_ms, 50);
    }

    #[test]
    fn test_cluster_constructor() {
        let config = CacheConfig::redis_cluster(vec!["redis://a:7000".into()]);

        assert!(config.is_cluster());
        assert_eq!(config.backend, BackendKind::Redis);
    }
}
