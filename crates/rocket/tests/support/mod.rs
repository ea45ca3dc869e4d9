//! Shared integration-test fixtures.
//!
//! [`MockBackend`] is an in-memory store with per-operation call counters,
//! scripted failure queues, and a write gate that holds backend writes open
//! until the test releases them. Enough to observe the cache, coalescing,
//! and backoff behavior from the outside.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;

use storage_rocket::{BackendError, ListEntry, ListOptions, ListPage, StorageBackend};

type WriteGate = (watch::Sender<bool>, watch::Receiver<bool>);

pub struct MockBackend {
    store: Mutex<BTreeMap<String, Value>>,
    write_gate: Mutex<Option<WriteGate>>,
    read_failures: Mutex<VecDeque<BackendError>>,
    write_failures: Mutex<VecDeque<BackendError>>,
    pub get_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    pub increment_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(BTreeMap::new()),
            write_gate: Mutex::new(None),
            read_failures: Mutex::new(VecDeque::new()),
            write_failures: Mutex::new(VecDeque::new()),
            get_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            increment_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
        })
    }

    /// Seed the store with an already-encoded (wire-form) value.
    pub fn insert_raw(&self, key: &str, value: Value) {
        self.store.lock().insert(key.to_string(), value);
    }

    /// The stored wire-form value, if any.
    pub fn value_of(&self, key: &str) -> Option<Value> {
        self.store.lock().get(key).cloned()
    }

    /// Queue errors returned by upcoming reads, oldest first.
    pub fn fail_reads<I>(&self, errors: I)
    where
        I: IntoIterator<Item = BackendError>,
    {
        self.read_failures.lock().extend(errors);
    }

    /// Queue errors returned by upcoming writes, oldest first.
    pub fn fail_writes<I>(&self, errors: I)
    where
        I: IntoIterator<Item = BackendError>,
    {
        self.write_failures.lock().extend(errors);
    }

    /// Queue `count` throttle failures on the read path.
    pub fn throttle_reads(&self, count: usize) {
        self.fail_reads((0..count).map(|_| BackendError::throttled("read quota exceeded")));
    }

    /// Queue `count` throttle failures on the write path.
    pub fn throttle_writes(&self, count: usize) {
        self.fail_writes((0..count).map(|_| BackendError::throttled("write quota exceeded")));
    }

    /// Hold every write open until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        *self.write_gate.lock() = Some(watch::channel(false));
    }

    /// Release writes held by [`hold_writes`](Self::hold_writes).
    pub fn release_writes(&self) {
        if let Some((tx, _)) = self.write_gate.lock().take() {
            let _ = tx.send(true);
        }
    }

    async fn wait_write_gate(&self) {
        let gate = self.write_gate.lock().as_ref().map(|(_, rx)| rx.clone());
        if let Some(mut rx) = gate {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    fn next_read_failure(&self) -> Option<BackendError> {
        self.read_failures.lock().pop_front()
    }

    fn next_write_failure(&self) -> Option<BackendError> {
        self.write_failures.lock().pop_front()
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock-store"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.next_read_failure() {
            return Err(error);
        }
        Ok(self.store.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_write_gate().await;
        if let Some(error) = self.next_write_failure() {
            return Err(error);
        }
        self.store.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<Value>, BackendError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_write_gate().await;
        if let Some(error) = self.next_write_failure() {
            return Err(error);
        }
        Ok(self.store.lock().remove(key))
    }

    async fn increment(&self, key: &str, delta: f64) -> Result<f64, BackendError> {
        self.increment_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_write_gate().await;
        if let Some(error) = self.next_write_failure() {
            return Err(error);
        }
        let mut store = self.store.lock();
        let current = store.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        let next = current + delta;
        store.insert(key.to_string(), json!(next));
        Ok(next)
    }

    async fn list(&self, options: ListOptions) -> Result<ListPage, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.next_read_failure() {
            return Err(error);
        }
        let store = self.store.lock();
        let limit = options.page_size.map(|n| n as usize).unwrap_or(usize::MAX);
        let items = store
            .iter()
            .take(limit)
            .map(|(key, value)| ListEntry { key: key.clone(), value: Some(value.clone()) })
            .collect();
        Ok(ListPage { items, next_cursor: None })
    }

    async fn destroy(&self) -> Result<(), BackendError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.store.lock().clear();
        Ok(())
    }
}

/// Route scheduler logs to the test output when `RUST_LOG` asks for them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("storage_rocket=debug")),
        )
        .with_test_writer()
        .try_init();
}
