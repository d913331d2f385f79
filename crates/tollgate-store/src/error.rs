//! Error types for the store connection.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Transient failure classes that are retried with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    ConnectionRefused,
    ConnectionReset,
    Timeout,
    DnsFailure,
    /// MOVED / ASK redirection.
    ClusterRedirect,
    TryAgain,
    ClusterDown,
    /// Server is loading its dataset.
    Loading,
    /// Server is busy running a script.
    Busy,
}

impl TransientKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionReset => "connection_reset",
            Self::Timeout => "timeout",
            Self::DnsFailure => "dns_failure",
            Self::ClusterRedirect => "cluster_redirect",
            Self::TryAgain => "try_again",
            Self::ClusterDown => "cluster_down",
            Self::Loading => "loading",
            Self::Busy => "busy",
        }
    }

    /// Whether this failure means the underlying socket is gone.
    #[must_use]
    pub const fn is_connection_loss(self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused | Self::ConnectionReset | Self::DnsFailure
        )
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors for store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("transient store error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    #[error("store command failed: {0}")]
    Command(String),

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: String,
    },

    #[error("not connected to store")]
    NotConnected,

    #[error("store reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("initial store connection failed: {0}")]
    ConnectFailed(String),

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Build a transient error.
    #[must_use]
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    /// Whether the operation may succeed if retried after a backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Transient kind, if any.
    #[must_use]
    pub const fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            Self::Transient { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether the failure indicates the connection itself is lost.
    #[must_use]
    pub const fn is_connection_loss(&self) -> bool {
        match self {
            Self::Transient { kind, .. } => kind.is_connection_loss(),
            _ => false,
        }
    }

    /// Whether the connection is terminal and callers should stop trying.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = StoreError::transient(TransientKind::Loading, "LOADING dataset");

        assert!(err.is_transient());
        assert!(!err.is_connection_loss());
        assert_eq!(err.transient_kind(), Some(TransientKind::Loading));
    }

    #[test]
    fn test_connection_loss_kinds() {
        assert!(TransientKind::ConnectionRefused.is_connection_loss());
        assert!(TransientKind::ConnectionReset.is_connection_loss());
        assert!(TransientKind::DnsFailure.is_connection_loss());
        assert!(!TransientKind::Timeout.is_connection_loss());
        assert!(!TransientKind::ClusterRedirect.is_connection_loss());
        assert!(!TransientKind::Busy.is_connection_loss());
    }

    #[test]
    fn test_non_transient_errors() {
        assert!(!StoreError::Command("WRONGTYPE".into()).is_transient());
        assert!(!StoreError::NotConnected.is_transient());

        let exhausted = StoreError::ReconnectExhausted { attempts: 5 };
        assert!(!exhausted.is_transient());
        assert!(exhausted.is_terminal());
        assert!(exhausted.to_string().contains("5 attempts"));
    }
}
