//! Trust evaluation for limit bypass.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{TrustEntry, TrustError, parse_entries};
use crate::ranges::{canonical_ip, is_internal};

/// Bypass level granted to a caller address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Not trusted; normal limiting applies.
    None,
    /// Increased limit.
    Partial,
    /// Limits bypassed entirely.
    Full,
}

impl TrustLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a trust level was granted or withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrustReason {
    /// Exact match in the trusted address set.
    TrustedAddress { address: IpAddr },
    /// Inside a trusted range.
    TrustedRange { range: IpNet },
    /// The endpoint is flagged bypass-eligible.
    BypassEndpoint,
    /// Private, loopback or link-local address.
    InternalNetwork,
    /// Well-formed but not trusted.
    Untrusted,
    /// Could not be parsed as an IP address.
    InvalidAddress,
}

impl fmt::Display for TrustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustedAddress { address } => write!(f, "trusted address {address}"),
            Self::TrustedRange { range } => write!(f, "trusted range {range}"),
            Self::BypassEndpoint => f.write_str("bypass-eligible endpoint"),
            Self::InternalNetwork => f.write_str("internal network"),
            Self::Untrusted => f.write_str("untrusted"),
            Self::InvalidAddress => f.write_str("invalid address"),
        }
    }
}

/// Result of a trust check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrustCheck {
    /// Any bypass applies (`level` is not `None`).
    pub trusted: bool,
    pub level: TrustLevel,
    pub reason: TrustReason,
}

impl TrustCheck {
    const fn new(level: TrustLevel, reason: TrustReason) -> Self {
        Self {
            trusted: !matches!(level, TrustLevel::None),
            level,
            reason,
        }
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self.level, TrustLevel::Full)
    }

    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self.level, TrustLevel::Partial)
    }
}

/// Trust configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Trusted addresses and CIDR ranges, in match order.
    pub trusted: Vec<String>,

    /// Grant partial bypass to private, loopback and link-local addresses.
    pub private_networks_partial: bool,

    /// Endpoints whose callers get partial bypass.
    pub bypass_endpoints: Vec<String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted: Vec::new(),
            private_networks_partial: true,
            bypass_endpoints: Vec::new(),
        }
    }
}

/// Evaluates caller addresses against the trusted entries.
///
/// Entries are partitioned into an address set (O(1) lookup) and an ordered
/// range list (linear scan, first match wins). The flat list keeps the
/// configured order for reporting.
#[derive(Debug, Clone, Default)]
pub struct TrustEvaluator {
    entries: Vec<TrustEntry>,
    addresses: HashSet<IpAddr>,
    ranges: Vec<IpNet>,
    bypass_endpoints: HashSet<String>,
    private_networks_partial: bool,
}

impl TrustEvaluator {
    /// Empty evaluator with private-network partial bypass disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidEntry`] if any trusted entry fails to parse.
    pub fn from_config(config: &TrustConfig) -> Result<Self, TrustError> {
        let mut evaluator = Self::new()
            .with_private_networks_partial(config.private_networks_partial)
            .with_bypass_endpoints(config.bypass_endpoints.iter().cloned());
        for entry in parse_entries(&config.trusted)? {
            evaluator.add_trusted(entry);
        }
        Ok(evaluator)
    }

    #[must_use]
    pub const fn with_private_networks_partial(mut self, enabled: bool) -> Self {
        self.private_networks_partial = enabled;
        self
    }

    #[must_use]
    pub fn with_bypass_endpoints(mut self, endpoints: impl IntoIterator<Item = String>) -> Self {
        self.bypass_endpoints.extend(endpoints);
        self
    }

    /// Check a raw address string. Malformed input is untrusted, never an error.
    #[must_use]
    pub fn check_trust(&self, ip: &str, endpoint: Option<&str>) -> TrustCheck {
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => self.check_addr(addr, endpoint),
            Err(_) => {
                debug!(ip, "unparseable caller address treated as untrusted");
                TrustCheck::new(TrustLevel::None, TrustReason::InvalidAddress)
            }
        }
    }

    /// Check a parsed address.
    #[must_use]
    pub fn check_addr(&self, addr: IpAddr, endpoint: Option<&str>) -> TrustCheck {
        let addr = canonical_ip(addr);

        if self.addresses.contains(&addr) {
            return TrustCheck::new(TrustLevel::Full, TrustReason::TrustedAddress { address: addr });
        }

        if let Some(range) = self.ranges.iter().find(|net| net.contains(&addr)) {
            return TrustCheck::new(TrustLevel::Full, TrustReason::TrustedRange { range: *range });
        }

        if endpoint.is_some_and(|e| self.is_bypass_endpoint(e)) {
            return TrustCheck::new(TrustLevel::Partial, TrustReason::BypassEndpoint);
        }

        if self.private_networks_partial && is_internal(addr) {
            return TrustCheck::new(TrustLevel::Partial, TrustReason::InternalNetwork);
        }

        TrustCheck::new(TrustLevel::None, TrustReason::Untrusted)
    }

    /// Add an entry. Returns `false` if it was already present.
    pub fn add_trusted(&mut self, entry: TrustEntry) -> bool {
        if self.entries.contains(&entry) {
            return false;
        }
        match entry {
            TrustEntry::Address(addr) => {
                self.addresses.insert(addr);
            }
            TrustEntry::Range(net) => self.ranges.push(net),
        }
        self.entries.push(entry);
        true
    }

    /// Remove an entry. Returns `false` if it was not present.
    pub fn remove_trusted(&mut self, entry: &TrustEntry) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e == entry) else {
            return false;
        };
        self.entries.remove(pos);
        match entry {
            TrustEntry::Address(addr) => {
                self.addresses.remove(addr);
            }
            TrustEntry::Range(net) => self.ranges.retain(|r| r != net),
        }
        true
    }

    /// Trusted entries in configured order.
    #[must_use]
    pub fn entries(&self) -> &[TrustEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_bypass_endpoint(&self, endpoint: &str) -> bool {
        self.bypass_endpoints.contains(endpoint)
    }
}

/// Lock-guarded evaluator for concurrent checks and runtime mutation.
#[derive(Debug, Default)]
pub struct SharedTrustEvaluator {
    inner: RwLock<TrustEvaluator>,
}

impl SharedTrustEvaluator {
    #[must_use]
    pub const fn new(evaluator: TrustEvaluator) -> Self {
        Self {
            inner: RwLock::new(evaluator),
        }
    }

    #[must_use]
    pub fn check_trust(&self, ip: &str, endpoint: Option<&str>) -> TrustCheck {
        self.inner.read().check_trust(ip, endpoint)
    }

    #[must_use]
    pub fn check_addr(&self, addr: IpAddr, endpoint: Option<&str>) -> TrustCheck {
        self.inner.read().check_addr(addr, endpoint)
    }

    pub fn add_trusted(&self, entry: TrustEntry) -> bool {
        self.inner.write().add_trusted(entry)
    }

    pub fn remove_trusted(&self, entry: &TrustEntry) -> bool {
        self.inner.write().remove_trusted(entry)
    }

    /// Snapshot of the entries in configured order.
    #[must_use]
    pub fn entries(&self) -> Vec<TrustEntry> {
        self.inner.read().entries().to_vec()
    }
}

impl From<TrustEvaluator> for SharedTrustEvaluator {
    fn from(evaluator: TrustEvaluator) -> Self {
        Self::new(evaluator)
    }
}
