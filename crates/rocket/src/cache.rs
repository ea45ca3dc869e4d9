//! In-memory entry store with synchronization tracking and expiry sweeps.
//!
//! Every key maps to a [`CacheEntry`] that remembers whether its value is
//! confirmed to match the backend's committed state (`synchronized`) and
//! when it was last touched. The periodic sweep only ever removes
//! synchronized entries. An unsynchronized entry represents a local write
//! that has not been confirmed durable yet, and dropping it would lose data,
//! so it stays put no matter how old it gets.
//!
//! Handles are cheap to clone and share one underlying map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::stats::{CacheStats, MetricsCollector};

/// A single cached value and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Whether the value is confirmed to match the backend's committed
    /// state. `false` means it reflects a local write still in flight.
    pub synchronized: bool,
    /// The cached value. `None` with `synchronized == false` is a pending
    /// delete; `None` with `synchronized == true` is a confirmed-missing
    /// key.
    pub data: Option<Value>,
    last_accessed: Instant,
}

impl CacheEntry {
    /// How long the entry has been sitting unaccessed.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed)
    }
}

/// Keyed entry store shared by the facade and both schedulers.
pub struct CacheStore<C = SystemClock>
where
    C: Clock + Clone,
{
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    metrics: MetricsCollector,
    clock: C,
}

impl CacheStore<SystemClock> {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for CacheStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CacheStore<C>
where
    C: Clock + Clone,
{
    /// Create an empty store on the given clock.
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            metrics: MetricsCollector::new(),
            clock,
        }
    }

    /// Look up an entry, bumping its last-accessed time.
    ///
    /// `None` signals a cache miss; a present entry with absent `data` is a
    /// hit (pending delete or confirmed-missing key).
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = now;
                self.metrics.record_hit();
                Some(entry.clone())
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Upsert an entry with the current timestamp.
    pub fn insert(&self, key: impl Into<String>, data: Option<Value>, synchronized: bool) {
        let entry = CacheEntry { synchronized, data, last_accessed: self.clock.now() };
        self.entries.lock().insert(key.into(), entry);
        self.metrics.record_insert();
    }

    /// Flip an entry to synchronized. Returns `false` when the key is not
    /// cached.
    pub fn mark_synchronized(&self, key: &str) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(entry) => {
                entry.synchronized = true;
                true
            }
            None => false,
        }
    }

    /// Whether an entry exists for `key`, without touching access metadata.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// The entry's synchronization flag, without touching access metadata.
    pub fn is_synchronized(&self, key: &str) -> Option<bool> {
        self.entries.lock().get(key).map(|entry| entry.synchronized)
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Remove synchronized entries idle longer than `expiry`, returning the
    /// number removed. Unsynchronized entries are never swept, regardless of
    /// age.
    pub fn sweep(&self, expiry: Duration) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.synchronized && entry.idle_for(now) > expiry)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.remove(key);
            self.metrics.record_expiration();
        }

        expired.len()
    }

    /// Current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.entries.lock().len())
    }
}

impl<C> Clone for CacheStore<C>
where
    C: Clock + Clone,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        }
    }
}
