//! The public facade: cache-first reads, optimistic coalesced writes, and
//! the background expiry sweeper.
//!
//! A [`StorageRocket`] owns one cache store, one read scheduler, and one
//! write scheduler, all sharing clones of the same underlying state;
//! handles are cheap to clone and every clone observes the same instance.
//!
//! Writes update the cache immediately (optimistic, unsynchronized) and
//! enqueue a durable write; reads are answered from the cache when possible
//! and otherwise fall through to the read scheduler, which repopulates the
//! cache as synchronized.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::{ListOptions, ListPage, StorageBackend};
use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::codec::ValueCodec;
use crate::config::{RocketConfig, RocketOptions, UploadOptions};
use crate::error::{RocketError, RocketResult};
use crate::sched::read::{ReadOutcome, ReadScheduler};
use crate::sched::write::{WriteOp, WriteOutcome, WriteScheduler};
use crate::throttle::ThrottleTracker;
use crate::upload_group::UploadGroup;

/// Caching, coalescing front for one remote storage space.
///
/// Construction spawns the expiry sweeper, so a Tokio runtime must be
/// current. Call [`shutdown`](Self::shutdown) to stop background work.
pub struct StorageRocket<C = SystemClock>
where
    C: Clock + Clone,
{
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) cache: CacheStore<C>,
    pub(crate) config: Arc<Mutex<RocketConfig>>,
    pub(crate) reads: ReadScheduler<C>,
    pub(crate) writes: WriteScheduler<C>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StorageRocket<SystemClock> {
    /// Create a facade over `backend` with default settings.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_options(backend, RocketOptions::default())
    }

    /// Create a facade over `backend`, merging `options` over the defaults.
    pub fn with_options(backend: Arc<dyn StorageBackend>, options: RocketOptions) -> Self {
        Self::with_clock(backend, options, SystemClock)
    }
}

impl<C> StorageRocket<C>
where
    C: Clock + Clone,
{
    /// Create a facade on the given clock. Tests use this with
    /// [`MockClock`](crate::clock::MockClock) to drive expiry and backoff
    /// deterministically.
    pub fn with_clock(backend: Arc<dyn StorageBackend>, options: RocketOptions, clock: C) -> Self {
        let mut config = RocketConfig::default();
        config.apply(&options);
        let start_sweeper = config.enable_cache_cleaning;

        let cache = CacheStore::with_clock(clock.clone());
        let reads = ReadScheduler::new(
            Arc::clone(&backend),
            cache.clone(),
            ThrottleTracker::new("read", clock.clone()),
        );
        let writes = WriteScheduler::new(cache.clone(), ThrottleTracker::new("write", clock));

        let rocket = Self {
            backend,
            cache,
            config: Arc::new(Mutex::new(config)),
            reads,
            writes,
            sweeper: Arc::new(Mutex::new(None)),
        };
        if start_sweeper {
            rocket.ensure_sweeper();
        }
        rocket
    }

    /// Name of the underlying storage space.
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Shared handle to the local entry store.
    pub fn cache(&self) -> CacheStore<C> {
        self.cache.clone()
    }

    /// Snapshot of the live configuration.
    pub fn config(&self) -> RocketConfig {
        *self.config.lock()
    }

    /// Fetch the value under `key`, cache first.
    ///
    /// A cache hit (including a pending delete or a confirmed-missing key)
    /// answers without contacting the backend. A miss goes through the read
    /// scheduler and repopulates the cache as synchronized.
    pub async fn get(&self, key: &str, max_attempts: Option<u32>) -> RocketResult<Option<Value>> {
        if let Some(entry) = self.cache.get(key) {
            debug!(key, "cache hit");
            return Ok(entry.data);
        }

        let attempts = max_attempts.unwrap_or_else(|| self.config.lock().upload.max_attempts);
        let rx = self.reads.enqueue(Some(key.to_string()), None, attempts);
        let outcome = rx.await.map_err(|_| RocketError::TaskDropped)??;
        match outcome {
            ReadOutcome::Value(value) => Ok(value),
            ReadOutcome::Page(_) => Ok(None),
        }
    }

    /// List stored entries. Pages are never cached; item values are decoded
    /// before being handed back.
    pub async fn list(
        &self,
        options: ListOptions,
        max_attempts: Option<u32>,
    ) -> RocketResult<ListPage> {
        let attempts = max_attempts.unwrap_or_else(|| self.config.lock().upload.max_attempts);
        let rx = self.reads.enqueue(None, Some(options), attempts);
        let outcome = rx.await.map_err(|_| RocketError::TaskDropped)??;
        match outcome {
            ReadOutcome::Page(page) => Ok(page),
            ReadOutcome::Value(_) => Ok(ListPage::default()),
        }
    }

    /// Store `value` under `key`.
    ///
    /// The cache is updated immediately; unless `upload: false`, the call
    /// resolves once the (possibly coalesced) durable write settles.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        options: Option<UploadOptions>,
    ) -> RocketResult<()> {
        self.cache.insert(key, Some(value.clone()), false);

        let (attempts, upload, codec) = self.write_settings(options);
        if !upload {
            return Ok(());
        }

        let wire = codec.encode(&value);
        let rx = self.writes.enqueue(key, self.set_op(key, wire), attempts);
        rx.await.map_err(|_| RocketError::TaskDropped)??;
        Ok(())
    }

    /// Apply `updater` to the current value (cache first) and store the
    /// result.
    pub async fn update<F>(
        &self,
        key: &str,
        updater: F,
        options: Option<UploadOptions>,
    ) -> RocketResult<()>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let prev = self.get(key, None).await?;
        let value = updater(prev);
        self.set(key, value, options).await
    }

    /// Delete `key`, returning the decoded prior value once the backend
    /// confirms.
    ///
    /// The cache keeps a pending-delete entry until the removal is durable,
    /// so reads in the meantime do not resurrect the old value.
    pub async fn remove(
        &self,
        key: &str,
        options: Option<UploadOptions>,
    ) -> RocketResult<Option<Value>> {
        self.cache.insert(key, None, false);

        let (attempts, upload, codec) = self.write_settings(options);
        if !upload {
            return Ok(None);
        }

        let backend = Arc::clone(&self.backend);
        let key_owned = key.to_string();
        let op: WriteOp = Arc::new(move || {
            let backend = Arc::clone(&backend);
            let key = key_owned.clone();
            Box::pin(async move {
                let prior = backend.remove(&key).await?;
                Ok(WriteOutcome::Removed(prior.map(|wire| codec.decode(&wire))))
            })
        });

        let rx = self.writes.enqueue(key, op, attempts);
        match rx.await.map_err(|_| RocketError::TaskDropped)?? {
            WriteOutcome::Removed(prior) => Ok(prior),
            _ => Ok(None),
        }
    }

    /// Add `delta` (default 1) to the cached numeric value under `key`.
    ///
    /// Fails synchronously, with no backend call, when the cached value is
    /// present but not a number. An absent value counts from 0. Resolves
    /// with the backend's counter when the settled outcome carries one,
    /// otherwise with the locally computed value.
    pub async fn increment(
        &self,
        key: &str,
        delta: Option<f64>,
        options: Option<UploadOptions>,
    ) -> RocketResult<f64> {
        let step = delta.unwrap_or(1.0);
        let current = match self.cache.get(key).and_then(|entry| entry.data) {
            None => 0.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(_) => return Err(RocketError::NonNumericValue { key: key.to_string() }),
        };
        let next = current + step;
        self.cache.insert(key, Some(Value::from(next)), false);

        let (attempts, upload, _) = self.write_settings(options);
        if !upload {
            return Ok(next);
        }

        let backend = Arc::clone(&self.backend);
        let key_owned = key.to_string();
        let op: WriteOp = Arc::new(move || {
            let backend = Arc::clone(&backend);
            let key = key_owned.clone();
            Box::pin(async move { backend.increment(&key, step).await.map(WriteOutcome::Count) })
        });

        let rx = self.writes.enqueue(key, op, attempts);
        match rx.await.map_err(|_| RocketError::TaskDropped)?? {
            WriteOutcome::Count(value) => Ok(value),
            _ => Ok(next),
        }
    }

    /// Tear down the storage space. No caching semantics apply.
    pub async fn destroy(&self) -> RocketResult<()> {
        self.backend.destroy().await.map_err(RocketError::from)
    }

    /// A key-bound view over this facade.
    pub fn upload_group(&self, key: impl Into<String>) -> UploadGroup<C> {
        UploadGroup::new(self.clone(), key.into())
    }

    /// Merge `options` into the live configuration. Sweep-timer changes take
    /// effect immediately through the explicit setters.
    pub fn configure(&self, options: RocketOptions) {
        self.config.lock().apply(&options);
        if let Some(interval) = options.cleanup_interval {
            self.set_cleanup_interval(interval);
        }
        if let Some(enabled) = options.enable_cache_cleaning {
            self.set_cleanup_enabled(enabled);
        }
        info!(store = self.backend.name(), "configuration updated");
    }

    /// Change the sweep interval, rearming the running sweeper.
    pub fn set_cleanup_interval(&self, interval: Duration) {
        self.config.lock().cleanup.cleanup_interval = interval.max(Duration::from_millis(1));
        let mut slot = self.sweeper.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
            *slot = Some(self.spawn_sweeper());
        }
    }

    /// Start or stop the background sweep.
    pub fn set_cleanup_enabled(&self, enabled: bool) {
        self.config.lock().enable_cache_cleaning = enabled;
        if enabled {
            self.ensure_sweeper();
        } else if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Whether the background sweep is currently running.
    pub fn cleanup_enabled(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Stop background work. Pending scheduler tasks settle on their own.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn write_settings(&self, options: Option<UploadOptions>) -> (u32, bool, ValueCodec) {
        let defaults = self.config.lock().upload;
        let options = options.unwrap_or_default();
        (
            options.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            options.upload.unwrap_or(defaults.upload),
            ValueCodec::new(options.compression.unwrap_or(defaults.compression)),
        )
    }

    fn set_op(&self, key: &str, wire: Value) -> WriteOp {
        let backend = Arc::clone(&self.backend);
        let key = key.to_string();
        Arc::new(move || {
            let backend = Arc::clone(&backend);
            let key = key.clone();
            let wire = wire.clone();
            Box::pin(async move { backend.set(&key, wire).await.map(|_| WriteOutcome::Ack) })
        })
    }

    fn ensure_sweeper(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_none() {
            *slot = Some(self.spawn_sweeper());
        }
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            loop {
                let (interval, expiry) = {
                    let config = config.lock();
                    (config.cleanup.cleanup_interval, config.cleanup.expiry_duration)
                };
                tokio::time::sleep(interval.max(Duration::from_millis(1))).await;
                let removed = cache.sweep(expiry);
                if removed > 0 {
                    debug!(removed, "expiry sweep evicted synchronized entries");
                }
            }
        })
    }
}

impl<C> Clone for StorageRocket<C>
where
    C: Clock + Clone,
{
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cache: self.cache.clone(),
            config: Arc::clone(&self.config),
            reads: self.reads.clone(),
            writes: self.writes.clone(),
            sweeper: Arc::clone(&self.sweeper),
        }
    }
}
