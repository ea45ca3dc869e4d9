//! Read scheduler: per-key deduplication with the shared backoff
//! discipline.
//!
//! Reads are idempotent, so no operation coalescing is needed: concurrent
//! callers for the same key simply share one backend call. Keyed lookups
//! repopulate the cache as synchronized (absent keys included, so a miss is
//! remembered); list queries all share the `None` group, run with the newest
//! caller's options, and are never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{ListOptions, ListPage, StorageBackend};
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::codec::ValueCodec;
use crate::error::{BackendError, RocketError};
use crate::throttle::ThrottleTracker;

/// Shared result delivered to every caller of a settled read group.
#[derive(Debug, Clone)]
pub(crate) enum ReadOutcome {
    /// A keyed lookup; the value is already decoded.
    Value(Option<Value>),
    /// A list query; item values are already decoded.
    Page(ListPage),
}

struct ReadTask {
    tx: oneshot::Sender<Result<ReadOutcome, RocketError>>,
    remaining_attempts: u32,
    options: Option<ListOptions>,
}

struct ReadGroup {
    tasks: Vec<ReadTask>,
    in_flight: bool,
    retry: Option<JoinHandle<()>>,
}

/// Per-key (or per-listing) deduplicating scheduler for backend reads.
pub(crate) struct ReadScheduler<C>
where
    C: Clock + Clone,
{
    groups: Arc<Mutex<HashMap<Option<String>, ReadGroup>>>,
    backend: Arc<dyn StorageBackend>,
    cache: CacheStore<C>,
    codec: ValueCodec,
    throttle: ThrottleTracker<C>,
}

impl<C> Clone for ReadScheduler<C>
where
    C: Clock + Clone,
{
    fn clone(&self) -> Self {
        Self {
            groups: Arc::clone(&self.groups),
            backend: Arc::clone(&self.backend),
            cache: self.cache.clone(),
            codec: self.codec,
            throttle: self.throttle.clone(),
        }
    }
}

impl<C> ReadScheduler<C>
where
    C: Clock + Clone,
{
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        cache: CacheStore<C>,
        throttle: ThrottleTracker<C>,
    ) -> Self {
        Self {
            groups: Arc::new(Mutex::new(HashMap::new())),
            backend,
            cache,
            codec: ValueCodec::default(),
            throttle,
        }
    }

    /// Enqueue a backend read. `key` is `None` for list queries; `options`
    /// only applies to those.
    pub(crate) fn enqueue(
        &self,
        key: Option<String>,
        options: Option<ListOptions>,
        max_attempts: u32,
    ) -> oneshot::Receiver<Result<ReadOutcome, RocketError>> {
        let (tx, rx) = oneshot::channel();
        let task = ReadTask { tx, remaining_attempts: max_attempts.max(1), options };

        let mut groups = self.groups.lock();
        match groups.get_mut(&key) {
            Some(group) => {
                group.tasks.push(task);
                if let Some(timer) = group.retry.take() {
                    timer.abort();
                }
                if !group.in_flight {
                    let _ = self.spawn_run(key.clone(), Duration::ZERO);
                }
            }
            None => {
                groups.insert(
                    key.clone(),
                    ReadGroup { tasks: vec![task], in_flight: false, retry: None },
                );
                let _ = self.spawn_run(key, Duration::ZERO);
            }
        }

        rx
    }

    /// Number of keys with pending read groups.
    #[cfg(test)]
    pub(crate) fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }

    fn spawn_run(&self, key: Option<String>, delay: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            scheduler.run(&key).await;
        })
    }

    async fn run(&self, key: &Option<String>) {
        let options = {
            let mut groups = self.groups.lock();
            let Some(group) = groups.get_mut(key) else {
                return;
            };
            if group.in_flight {
                return;
            }
            if group.tasks.is_empty() {
                groups.remove(key);
                return;
            }
            // The newest caller's parameters win for list queries.
            let options = group.tasks[group.tasks.len() - 1].options.clone();
            group.retry = None;
            group.in_flight = true;
            options
        };

        let result = match key {
            Some(key_name) => self.backend.get(key_name).await.map(|wire| {
                let decoded = wire.map(|value| self.codec.decode(&value));
                // The read confirms the committed state, absent keys
                // included.
                self.cache.insert(key_name.clone(), decoded.clone(), true);
                ReadOutcome::Value(decoded)
            }),
            None => self
                .backend
                .list(options.unwrap_or_default())
                .await
                .map(|page| ReadOutcome::Page(self.decode_page(page))),
        };

        match result {
            Ok(outcome) => self.settle_success(key, outcome),
            Err(error) => self.settle_failure(key, error),
        }
    }

    fn decode_page(&self, mut page: ListPage) -> ListPage {
        for item in &mut page.items {
            if let Some(value) = item.value.take() {
                item.value = Some(self.codec.decode(&value));
            }
        }
        page
    }

    fn settle_success(&self, key: &Option<String>, outcome: ReadOutcome) {
        let Some(group) = self.groups.lock().remove(key) else {
            return;
        };

        debug!(?key, waiters = group.tasks.len(), "read group settled");
        for task in group.tasks {
            let _ = task.tx.send(Ok(outcome.clone()));
        }

        if self.throttle.clear() {
            self.remind_others(key);
        }
    }

    fn settle_failure(&self, key: &Option<String>, error: BackendError) {
        let mut rejected = None;
        let mut episode_over = false;

        {
            let mut groups = self.groups.lock();
            let Some(group) = groups.get_mut(key) else {
                return;
            };
            group.in_flight = false;

            if error.is_throttled() {
                self.throttle.mark();
                if let Some(last) = group.tasks.last_mut() {
                    last.remaining_attempts = last.remaining_attempts.saturating_sub(1);
                    if last.remaining_attempts == 0 {
                        if let Some(task) = group.tasks.pop() {
                            rejected = Some((task, RocketError::ReadAttemptsExhausted));
                        }
                    }
                }
                if group.tasks.is_empty() {
                    groups.remove(key);
                } else {
                    let delay = self.throttle.retry_delay();
                    warn!(?key, ?delay, "read throttled by backend; retry scheduled");
                    group.retry = Some(self.spawn_run(key.clone(), delay));
                }
            } else {
                if let Some(task) = group.tasks.pop() {
                    rejected = Some((task, RocketError::Backend(error)));
                }
                if group.tasks.is_empty() {
                    groups.remove(key);
                } else {
                    let delay = self.throttle.retry_delay();
                    group.retry = Some(self.spawn_run(key.clone(), delay));
                }
                episode_over = self.throttle.clear();
            }
        }

        if let Some((task, error)) = rejected {
            let _ = task.tx.send(Err(error));
        }
        if episode_over {
            self.remind_others(key);
        }
    }

    fn remind_others(&self, except: &Option<String>) {
        let mut groups = self.groups.lock();
        for (key, group) in groups.iter_mut() {
            if key == except || group.in_flight {
                continue;
            }
            if let Some(timer) = group.retry.take() {
                timer.abort();
            }
            group.retry = Some(self.spawn_run(key.clone(), Duration::ZERO));
        }
    }
}
