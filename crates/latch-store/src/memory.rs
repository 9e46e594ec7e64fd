// In-memory lock store
// Provides set-if-absent and compare-and-delete with per-key expiry

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::traits::{LockStore, StoreConfig, StoreConnector};

/// A stored key with its expiry
struct StoreEntry {
    value: String,
    written_at: Instant,
    ttl: Duration,
}

impl StoreEntry {
    fn is_expired(&self) -> bool {
        self.written_at.elapsed() >= self.ttl
    }
}

/// In-memory store instance backed by DashMap.
///
/// Expired keys are treated as absent and reclaimed lazily on the next write.
/// The availability switch and injected latency simulate partitions and slow
/// round-trips.
pub struct MemoryStore {
    name: String,
    entries: DashMap<String, StoreEntry>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Mark the instance reachable or unreachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
        info!(store = %self.name, available, "Memory store availability changed");
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Current live value for `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    /// Number of live (non-expired) keys
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn round_trip(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.round_trip().await?;

        let fresh = StoreEntry {
            value: value.to_string(),
            written_at: Instant::now(),
            ttl,
        };

        let written = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };

        debug!(store = %self.name, key = %key, written, "set_if_absent");
        Ok(written)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        self.round_trip().await?;

        let deleted = self
            .entries
            .remove_if(key, |_, entry| entry.value == value)
            .is_some_and(|(_, entry)| !entry.is_expired());

        debug!(store = %self.name, key = %key, deleted, "delete_if_equals");
        Ok(deleted)
    }
}

/// Connector handing out a fixed set of in-memory instances.
///
/// The endpoint list in the configuration is ignored; each call returns the
/// same instances so state is shared between connections.
pub struct MemoryConnector {
    stores: Vec<Arc<MemoryStore>>,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
}

impl MemoryConnector {
    pub fn new(stores: Vec<Arc<MemoryStore>>) -> Self {
        Self {
            stores,
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        }
    }

    /// Create a connector over `count` fresh instances named `memory-0..n`
    pub fn with_instances(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|i| Arc::new(MemoryStore::new(format!("memory-{}", i))))
                .collect(),
        )
    }

    pub fn stores(&self) -> &[Arc<MemoryStore>] {
        &self.stores
    }

    /// Number of times `connect` has been invoked
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make subsequent `connect` calls fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, _config: &StoreConfig) -> Result<Vec<Arc<dyn LockStore>>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        // Yield so concurrent first callers overlap with an in-flight connect
        tokio::task::yield_now().await;

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory connector".to_string()));
        }

        Ok(self
            .stores
            .iter()
            .map(|store| store.clone() as Arc<dyn LockStore>)
            .collect())
    }
}
