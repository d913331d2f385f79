//! In-process store backend.
//!
//! Honors TTLs and supports fault injection, so connection and fallback
//! behavior can be exercised without a live Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{BackendConnector, KvBackend, Topology};
use crate::command::{StoreCommand, StoreReply};
use crate::error::{StoreError, TransientKind};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    down: bool,
    queued: VecDeque<StoreError>,
}

/// In-process key-value store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    faults: Mutex<FaultPlan>,
    commands: AtomicU64,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every command fails with `ConnectionRefused` until cleared.
    pub fn set_down(&self, down: bool) {
        self.faults.lock().down = down;
    }

    /// Fail the next `count` commands with the given error.
    pub fn fail_next(&self, count: usize, error: &StoreError) {
        let mut faults = self.faults.lock();
        faults.queued.extend(std::iter::repeat_n(error.clone(), count));
    }

    /// Number of commands received, including failed ones.
    #[must_use]
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Remaining TTL of a live key.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let entry = entries.get(key).filter(|e| !e.is_expired(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn injected_fault(&self) -> Option<StoreError> {
        let mut faults = self.faults.lock();
        if faults.down {
            return Some(StoreError::transient(
                TransientKind::ConnectionRefused,
                "in-process store is down",
            ));
        }
        faults.queued.pop_front()
    }

    fn apply(&self, command: &StoreCommand) -> StoreReply {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| !e.is_expired(now));

        match command {
            StoreCommand::Ping => StoreReply::Pong,
            StoreCommand::Get { key } => entries
                .get(key)
                .map_or(StoreReply::Nil, |e| StoreReply::Value(e.value.clone())),
            StoreCommand::Set { key, value, ttl } => {
                entries.insert(
                    key.clone(),
                    MemoryEntry {
                        value: value.clone(),
                        expires_at: ttl.map(|ttl| now + ttl),
                    },
                );
                StoreReply::Ok
            }
            StoreCommand::Del { key } => StoreReply::Integer(i64::from(entries.remove(key).is_some())),
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn execute(&self, command: &StoreCommand) -> Result<StoreReply, StoreError> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.injected_fault() {
            return Err(err);
        }
        Ok(self.apply(command))
    }

    fn topology(&self) -> Topology {
        Topology::InProcess
    }
}

/// Connector handing out a shared [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
    reachable: AtomicBool,
    connects: AtomicU32,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }
}

impl MemoryConnector {
    #[must_use]
    pub const fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            reachable: AtomicBool::new(true),
            connects: AtomicU32::new(0),
        }
    }

    /// The shared backend.
    #[must_use]
    pub fn backend(&self) -> Arc<MemoryBackend> {
        Arc::clone(&self.backend)
    }

    /// Make `connect` fail with `ConnectionRefused` while unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far.
    #[must_use]
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn KvBackend>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::transient(
                TransientKind::ConnectionRefused,
                "in-process store unreachable",
            ));
        }
        Ok(Arc::clone(&self.backend) as Arc<dyn KvBackend>)
    }

    fn describe(&self) -> String {
        "memory://in-process".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = MemoryBackend::new();

        assert_eq!(store.execute(&StoreCommand::get("k")).await.unwrap(), StoreReply::Nil);
        store.execute(&StoreCommand::set("k", "v")).await.unwrap();
        assert_eq!(
            store.execute(&StoreCommand::get("k")).await.unwrap(),
            StoreReply::Value("v".into())
        );
        assert_eq!(
            store.execute(&StoreCommand::del("k")).await.unwrap(),
            StoreReply::Integer(1)
        );
        assert_eq!(
            store.execute(&StoreCommand::del("k")).await.unwrap(),
            StoreReply::Integer(0)
        );
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryBackend::new();
        store
            .execute(&StoreCommand::set_with_ttl("k", "v", Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.ttl("k").is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.execute(&StoreCommand::get("k")).await.unwrap(), StoreReply::Nil);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryBackend::new();
        store.fail_next(1, &StoreError::transient(TransientKind::Busy, "BUSY"));

        let err = store.execute(&StoreCommand::Ping).await.unwrap_err();
        assert_eq!(err.transient_kind(), Some(TransientKind::Busy));
        assert_eq!(store.execute(&StoreCommand::Ping).await.unwrap(), StoreReply::Pong);

        store.set_down(true);
        assert!(store.execute(&StoreCommand::Ping).await.unwrap_err().is_connection_loss());
        store.set_down(false);
        assert_eq!(store.command_count(), 3);
    }

    #[tokio::test]
    async fn test_connector_reachability() {
        let connector = MemoryConnector::default();
        assert!(connector.connect().await.is_ok());

        connector.set_reachable(false);
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.connect_count(), 2);
    }
}
