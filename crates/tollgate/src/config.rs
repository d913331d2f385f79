//! Admission configuration: TOML file, `TOLLGATE_*` environment overrides and
//! eager validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tollgate_ratelimit::{AdaptiveConfig, EndpointLimitConfig, EndpointTable, HeaderNames};
use tollgate_store::{BackendKind, CacheConfig};
use tollgate_telemetry::TelemetryConfig;
use tollgate_trust::{TrustConfig, parse_entries};

pub const ENV_REDIS_URL: &str = "TOLLGATE_REDIS_URL";
pub const ENV_ADAPTIVE_ENABLED: &str = "TOLLGATE_ADAPTIVE_ENABLED";
pub const ENV_MIN_LIMIT: &str = "TOLLGATE_MIN_LIMIT";
pub const ENV_MAX_LIMIT: &str = "TOLLGATE_MAX_LIMIT";
pub const ENV_TRUSTED_IPS: &str = "TOLLGATE_TRUSTED_IPS";
pub const ENV_LOG_LEVEL: &str = "TOLLGATE_LOG_LEVEL";

/// Configuration errors. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field `{field}`")]
    Missing { field: String },

    #[error("field `{field}` out of range: {message}")]
    OutOfRange { field: String, message: String },

    #[error("invalid field `{field}`: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn out_of_range(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            field: field.into(),
            message: message.into(),
        }
    }

    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Dotted path of the offending field.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Missing { field } | Self::OutOfRange { field, .. } | Self::Invalid { field, .. } => {
                Some(field)
            }
            Self::Io { .. } | Self::Parse(_) => None,
        }
    }
}

/// Complete admission-control configuration.
///
/// ```toml
/// [cache]
/// url = "redis://127.0.0.1:6379"
///
/// [adaptive]
/// min_limit = 10
/// max_limit = 10000
///
/// [limits.default]
/// max_requests = 100
/// window_ms = 60000
///
/// [limits.endpoints."/api/login"]
/// max_requests = 5
/// window_ms = 60000
///
/// [trust]
/// trusted = ["10.0.0.0/8"]
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    pub cache: CacheConfig,
    pub adaptive: AdaptiveConfig,
    pub limits: EndpointTable,
    pub trust: TrustConfig,
    pub headers: HeaderNames,
    pub telemetry: TelemetryConfig,
}

impl AdmissionConfig {
    /// Parse and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML, otherwise the first
    /// validation failure.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_unchecked(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML.
    pub fn parse_unchecked(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read, parse and validate a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read(path.as_ref())?)
    }

    /// Read a file, apply process environment overrides, then validate.
    ///
    /// # Errors
    ///
    /// As [`Self::from_file`], plus unparseable override values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::parse_unchecked(&read(path.as_ref())?)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TOLLGATE_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparseable values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparseable values.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_REDIS_URL) {
            self.cache.backend = BackendKind::Redis;
            self.cache.url = Some(url);
        }
        if let Some(value) = lookup(ENV_ADAPTIVE_ENABLED) {
            self.adaptive.enabled = parse_bool(ENV_ADAPTIVE_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_MIN_LIMIT) {
            self.adaptive.min_limit = parse_u32(ENV_MIN_LIMIT, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_LIMIT) {
            self.adaptive.max_limit = parse_u32(ENV_MAX_LIMIT, &value)?;
        }
        if let Some(value) = lookup(ENV_TRUSTED_IPS) {
            self.trust.trusted = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.telemetry.log_level = level;
        }
        Ok(())
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_adaptive(&self.adaptive)?;
        validate_limits(&self.limits)?;
        validate_cache(&self.cache)?;

        parse_entries(&self.trust.trusted)
            .map_err(|err| ConfigError::invalid("trust.trusted", err.to_string()))?;

        if let Some(field) = self.headers.empty_fields().first() {
            return Err(ConfigError::Missing {
                field: format!("headers.{field}"),
            });
        }
        if self.telemetry.log_level.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "telemetry.log_level".into(),
            });
        }

        Ok(())
    }

    /// Bypass endpoints from the trust section and from endpoint flags.
    #[must_use]
    pub fn bypass_endpoints(&self) -> Vec<String> {
        let mut endpoints = self.trust.bypass_endpoints.clone();
        for endpoint in self.limits.bypass_endpoints() {
            if !endpoints.iter().any(|e| e == endpoint) {
                endpoints.push(endpoint.to_string());
            }
        }
        endpoints
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_adaptive(adaptive: &AdaptiveConfig) -> Result<(), ConfigError> {
    if adaptive.min_limit < 1 {
        return Err(ConfigError::out_of_range("adaptive.min_limit", "must be at least 1"));
    }
    if adaptive.min_limit > adaptive.max_limit {
        return Err(ConfigError::out_of_range(
            "adaptive.max_limit",
            format!(
                "{} is below min_limit {}",
                adaptive.max_limit, adaptive.min_limit
            ),
        ));
    }
    if adaptive.ledger_ttl_secs == 0 {
        return Err(ConfigError::out_of_range("adaptive.ledger_ttl_secs", "must be positive"));
    }
    let multiplier = adaptive.partial_bypass_multiplier;
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(ConfigError::out_of_range(
            "adaptive.partial_bypass_multiplier",
            format!("{multiplier} is not a positive number"),
        ));
    }
    Ok(())
}

fn validate_endpoint(field: &str, endpoint: &EndpointLimitConfig) -> Result<(), ConfigError> {
    if endpoint.max_requests == 0 {
        return Err(ConfigError::out_of_range(
            format!("{field}.max_requests"),
            "must be positive",
        ));
    }
    if endpoint.window_ms == 0 {
        return Err(ConfigError::out_of_range(
            format!("{field}.window_ms"),
            "must be positive",
        ));
    }
    Ok(())
}

fn validate_limits(limits: &EndpointTable) -> Result<(), ConfigError> {
    validate_endpoint("limits.default", &limits.default)?;
    for (name, endpoint) in &limits.endpoints {
        if name.trim().is_empty() {
            return Err(ConfigError::invalid("limits.endpoints", "empty endpoint name"));
        }
        validate_endpoint(&format!("limits.endpoints.{name}"), endpoint)?;
    }
    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.backend == BackendKind::Redis {
        match &cache.cluster {
            Some(cluster) if cluster.nodes.is_empty() => {
                return Err(ConfigError::Missing {
                    field: "cache.cluster.nodes".into(),
                });
            }
            Some(_) => {}
            None if cache.url.as_deref().is_none_or(|u| u.trim().is_empty()) => {
                return Err(ConfigError::Missing {
                    field: "cache.url".into(),
                });
            }
            None => {}
        }
    }

    if cache.max_reconnect_attempts < 1 {
        return Err(ConfigError::out_of_range(
            "cache.max_reconnect_attempts",
            "must be at least 1",
        ));
    }
    if cache.retry_base_ms == 0 {
        return Err(ConfigError::out_of_range("cache.retry_base_ms", "must be positive"));
    }
    if cache.retry_max_ms < cache.retry_base_ms {
        return Err(ConfigError::out_of_range(
            "cache.retry_max_ms",
            format!(
                "{} is below retry_base_ms {}",
                cache.retry_max_ms, cache.retry_base_ms
            ),
        ));
    }
    for (field, value) in [
        ("cache.health_check_interval_ms", cache.health_check_interval_ms),
        ("cache.connect_timeout_ms", cache.connect_timeout_ms),
        ("cache.command_timeout_ms", cache.command_timeout_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::out_of_range(field, "must be positive"));
        }
    }
    Ok(())
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(var, format!("expected a boolean, got {other:?}"))),
    }
}

fn parse_u32(var: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(var, format!("expected an unsigned integer, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SAMPLE: &str = r#"
[cache]
url = "redis://127.0.0.1:6379"
key_prefix = "edge:"

[adaptive]
min_limit = 5
max_limit = 500

[limits.default]
max_requests = 100
window_ms = 60000

[limits.endpoints."/api/login"]
max_requests = 5
window_ms = 60000
burst = 2

[limits.endpoints."/internal/sync"]
bypass_eligible = true

[trust]
trusted = ["10.0.0.0/8", "192.168.1.10"]
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_sample() {
        let config = AdmissionConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.cache.key_prefix, "edge:");
        assert_eq!(config.adaptive.min_limit, 5);
        assert!(config.adaptive.enabled);
        assert_eq!(config.limits.resolve("/api/login").base_limit(), 7);
        assert_eq!(config.limits.resolve("/unknown").base_limit(), 100);
        assert_eq!(config.trust.trusted.len(), 2);
        assert_eq!(config.bypass_endpoints(), vec!["/internal/sync".to_string()]);
    }

    #[test]
    fn test_unknown_section_rejected() {
        let err = AdmissionConfig::from_toml_str("[nonsense]\nx = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_redis_url_required() {
        let err = AdmissionConfig::from_toml_str("").unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref field } if field == "cache.url"));

        let memory = AdmissionConfig::from_toml_str("[cache]\nbackend = \"memory\"\n");
        assert!(memory.is_ok());
    }

    #[test]
    fn test_cluster_needs_nodes() {
        let err = AdmissionConfig::from_toml_str("[cache.cluster]\nnodes = []\n").unwrap_err();
        assert_eq!(err.field(), Some("cache.cluster.nodes"));

        let ok = AdmissionConfig::from_toml_str(
            "[cache.cluster]\nnodes = [\"redis://a:7000\", \"redis://b:7001\"]\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_bounds_out_of_range() {
        let mut config = AdmissionConfig::from_toml_str(SAMPLE).unwrap();

        config.adaptive.min_limit = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
        assert_eq!(err.field(), Some("adaptive.min_limit"));

        config.adaptive.min_limit = 600;
        assert_eq!(config.validate().unwrap_err().field(), Some("adaptive.max_limit"));
    }

    #[test]
    fn test_endpoint_and_cache_ranges() {
        let mut config = AdmissionConfig::from_toml_str(SAMPLE).unwrap();
        config
            .limits
            .endpoints
            .get_mut("/api/login")
            .unwrap()
            .window_ms = 0;
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("limits.endpoints./api/login.window_ms")
        );

        let mut config = AdmissionConfig::from_toml_str(SAMPLE).unwrap();
        config.cache.retry_max_ms = 10;
        config.cache.retry_base_ms = 100;
        assert_eq!(config.validate().unwrap_err().field(), Some("cache.retry_max_ms"));

        let mut config = AdmissionConfig::from_toml_str(SAMPLE).unwrap();
        config.cache.max_reconnect_attempts = 0;
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("cache.max_reconnect_attempts")
        );
    }

    #[test]
    fn test_bad_trust_entry_and_empty_header() {
        let mut config = AdmissionConfig::from_toml_str(SAMPLE).unwrap();
        config.trust.trusted.push("10.0.0.0/33".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = AdmissionConfig::from_toml_str(SAMPLE).unwrap();
        config.headers.reset = String::new();
        assert_eq!(config.validate().unwrap_err().field(), Some("headers.reset"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AdmissionConfig::parse_unchecked("[cache]\nbackend = \"memory\"\n").unwrap();
        config
            .apply_overrides_from(env(&[
                (ENV_REDIS_URL, "redis://cache:6379"),
                (ENV_ADAPTIVE_ENABLED, "false"),
                (ENV_MIN_LIMIT, "2"),
                (ENV_MAX_LIMIT, "20"),
                (ENV_TRUSTED_IPS, " 10.0.0.1, 172.16.0.0/12 ,"),
                (ENV_LOG_LEVEL, "debug"),
            ]))
            .unwrap();

        assert_eq!(config.cache.backend, BackendKind::Redis);
        assert_eq!(config.cache.url.as_deref(), Some("redis://cache:6379"));
        assert!(!config.adaptive.enabled);
        assert_eq!((config.adaptive.min_limit, config.adaptive.max_limit), (2, 20));
        assert_eq!(config.trust.trusted, vec!["10.0.0.1", "172.16.0.0/12"]);
        assert_eq!(config.telemetry.log_level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_parse_failure() {
        let mut config = AdmissionConfig::default();
        let err = config
            .apply_overrides_from(env(&[(ENV_MIN_LIMIT, "lots")]))
            .unwrap_err();
        assert_eq!(err.field(), Some(ENV_MIN_LIMIT));
    }

    #[test]
    fn test_missing_file() {
        let err = AdmissionConfig::from_file("/nonexistent/tollgate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
