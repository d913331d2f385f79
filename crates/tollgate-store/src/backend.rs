//! Backend traits implemented by Redis and the in-process store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::command::{StoreCommand, StoreReply};
use crate::error::StoreError;

/// Topology of a connected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Standalone,
    Cluster,
    InProcess,
}

/// A live handle to a key-value store.
///
/// Implementations map their native failures onto [`StoreError`], classifying
/// retryable conditions as [`StoreError::Transient`].
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Execute a single command (one round-trip).
    async fn execute(&self, command: &StoreCommand) -> Result<StoreReply, StoreError>;

    /// Topology of this handle.
    fn topology(&self) -> Topology;
}

/// Establishes backend handles; used for the initial connect and every reconnect.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Open a new handle.
    async fn connect(&self) -> Result<Arc<dyn KvBackend>, StoreError>;

    /// Human-readable target description (never includes credentials).
    fn describe(&self) -> String;
}
