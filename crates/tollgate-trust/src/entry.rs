//! Trusted address and range entries.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ranges::canonical_ip;

/// Errors from trust configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    #[error("invalid trusted entry '{entry}': {reason}")]
    InvalidEntry { entry: String, reason: String },
}

/// A single trusted address or CIDR range.
///
/// Addresses are canonicalized (IPv4-mapped IPv6 becomes IPv4) and ranges are
/// truncated to their network address, so `10.1.2.3/8` and `10.0.0.0/8` are
/// the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrustEntry {
    Address(IpAddr),
    Range(IpNet),
}

impl TrustEntry {
    #[must_use]
    pub fn address(ip: IpAddr) -> Self {
        Self::Address(canonical_ip(ip))
    }

    #[must_use]
    pub fn range(net: IpNet) -> Self {
        Self::Range(net.trunc())
    }

    /// Whether `ip` (already canonical) is covered by this entry.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match self {
            Self::Address(addr) => *addr == ip,
            Self::Range(net) => net.contains(&ip),
        }
    }

    #[must_use]
    pub const fn is_range(&self) -> bool {
        matches!(self, Self::Range(_))
    }
}

impl FromStr for TrustEntry {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = |reason: String| TrustError::InvalidEntry {
            entry: s.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(invalid("empty entry".into()));
        }

        if trimmed.contains('/') {
            trimmed
                .parse::<IpNet>()
                .map(Self::range)
                .map_err(|e| invalid(e.to_string()))
        } else {
            trimmed
                .parse::<IpAddr>()
                .map(Self::address)
                .map_err(|e| invalid(e.to_string()))
        }
    }
}

impl TryFrom<String> for TrustEntry {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrustEntry> for String {
    fn from(entry: TrustEntry) -> Self {
        entry.to_string()
    }
}

impl fmt::Display for TrustEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{addr}"),
            Self::Range(net) => write!(f, "{net}"),
        }
    }
}

/// Parse a list of entries, failing on the first invalid one.
///
/// # Errors
///
/// Returns [`TrustError::InvalidEntry`] for the first entry that does not parse.
pub fn parse_entries<S: AsRef<str>>(entries: &[S]) -> Result<Vec<TrustEntry>, TrustError> {
    entries.iter().map(|e| e.as_ref().parse()).collect()
}
