// In-memory storage node
// TTL key-value store with lazy expiry, an optional background sweeper,
// and fault injection for exercising partial-failure paths

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use fencelock_common::BackendError;

use crate::StorageBackend;

/// A stored value with its absolute expiry; `None` when the TTL reaches
/// past what the clock can represent
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Number of calls issued against a node, counted whether or not they succeed
#[derive(Default)]
struct CallCounters {
    set_if_absent: AtomicU64,
    compare_and_delete: AtomicU64,
    increment: AtomicU64,
}

/// In-memory storage node using DashMap
///
/// Each primitive runs under the DashMap shard lock of its key, which makes
/// check-then-act sequences atomic with respect to concurrent callers.
/// Counters live in a separate map and never expire.
pub struct MemoryBackend {
    name: String,
    entries: Arc<DashMap<String, Entry>>,
    counters: DashMap<String, i64>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    calls: CallCounters,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(DashMap::new()),
            counters: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            calls: CallCounters::default(),
            cleanup_handle: None,
        }
    }

    /// Start a background task that purges expired entries every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_cleanup(mut self, interval: Duration) -> Self {
        let entries = self.entries.clone();
        let name = self.name.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                let purged = purge(&entries);
                if purged > 0 {
                    debug!(backend = %name, count = purged, "Purged expired entries");
                }
            }
        });

        self.cleanup_handle = Some(handle);
        self
    }

    /// Simulate the node going down (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Delay every subsequent call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Current live value stored under `key`, if any
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Current value of a counter, if it was ever incremented
    pub fn counter(&self, counter_key: &str) -> Option<i64> {
        self.counters.get(counter_key).map(|value| *value)
    }

    /// Remove every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }

    pub fn set_if_absent_calls(&self) -> u64 {
        self.calls.set_if_absent.load(Ordering::SeqCst)
    }

    pub fn compare_and_delete_calls(&self) -> u64 {
        self.calls.compare_and_delete.load(Ordering::SeqCst)
    }

    pub fn increment_calls(&self) -> u64 {
        self.calls.increment.load(Ordering::SeqCst)
    }

    /// Apply injected latency and outage before serving a call
    async fn admit(&self) -> Result<(), BackendError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.is_available() {
            return Err(BackendError::Unavailable(
                self.name.clone(),
                "node is down".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

fn purge(entries: &DashMap<String, Entry>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(entries.len())
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.calls.set_if_absent.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;

        if ttl.is_zero() {
            return Err(BackendError::Protocol(
                self.name.clone(),
                "invalid expire time".to_string(),
            ));
        }

        let now = Instant::now();
        let entry = Entry {
            value: value.to_string(),
            expires_at: now.checked_add(ttl),
        };

        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<u64, BackendError> {
        self.calls.compare_and_delete.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;

        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, entry| !entry.is_expired(now) && entry.value == expected);
        Ok(u64::from(removed.is_some()))
    }

    async fn increment(&self, counter_key: &str) -> Result<i64, BackendError> {
        self.calls.increment.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;

        let mut counter = self.counters.entry(counter_key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
