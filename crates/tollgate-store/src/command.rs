//! Typed store commands and replies.

use std::time::Duration;

/// A command understood by every store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    Ping,
    Get {
        key: String,
    },
    /// `SET key value [PX ttl]`.
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        key: String,
    },
}

impl StoreCommand {
    #[must_use]
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    #[must_use]
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    #[must_use]
    pub fn set_with_ttl(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        }
    }

    #[must_use]
    pub fn del(key: impl Into<String>) -> Self {
        Self::Del { key: key.into() }
    }

    /// Wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::Del { .. } => "DEL",
        }
    }

    /// Key the command operates on, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Ping => None,
            Self::Get { key } | Self::Set { key, .. } | Self::Del { key } => Some(key),
        }
    }
}

/// Reply from a store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreReply {
    Nil,
    Ok,
    Pong,
    Value(String),
    Integer(i64),
}

impl StoreReply {
    /// Consume into an optional string value (`Nil` → `None`).
    #[must_use]
    pub fn into_value(self) -> Option<String> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

/// Milliseconds for `PX`, at least 1.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
