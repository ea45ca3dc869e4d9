//! Write scheduler: last-write-wins coalescing with fan-out resolution.
//!
//! Every key with pending durable writes owns one group. Enqueueing into an
//! existing group supersedes any pending backoff timer and pushes the new
//! operation onto the end; execution always runs the newest operation, and
//! a successful call settles the entire group with the same outcome. A
//! caller must not assume its individual operation ran.
//!
//! Failure handling follows the direction's restriction episode: throttle
//! errors burn one attempt of the newest task and reschedule near the next
//! quota window boundary; any other error rejects that single task
//! immediately and lets the rest of the group retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::error::{BackendError, RocketError};
use crate::throttle::ThrottleTracker;

/// Deferred durable-write operation. Only the newest one in a group runs.
pub(crate) type WriteOp =
    Arc<dyn Fn() -> BoxFuture<'static, Result<WriteOutcome, BackendError>> + Send + Sync>;

/// Shared result delivered to every caller of a settled write group.
#[derive(Debug, Clone)]
pub(crate) enum WriteOutcome {
    /// The value was stored.
    Ack,
    /// The key was removed; carries the decoded prior value.
    Removed(Option<Value>),
    /// The counter was incremented; carries the backend's new value.
    Count(f64),
}

struct WriteTask {
    tx: oneshot::Sender<Result<WriteOutcome, RocketError>>,
    remaining_attempts: u32,
    op: WriteOp,
}

struct WriteGroup {
    tasks: Vec<WriteTask>,
    in_flight: bool,
    retry: Option<JoinHandle<()>>,
}

/// Per-key coalescing scheduler for durable writes.
pub(crate) struct WriteScheduler<C>
where
    C: Clock + Clone,
{
    groups: Arc<Mutex<HashMap<String, WriteGroup>>>,
    cache: CacheStore<C>,
    throttle: ThrottleTracker<C>,
}

impl<C> Clone for WriteScheduler<C>
where
    C: Clock + Clone,
{
    fn clone(&self) -> Self {
        Self {
            groups: Arc::clone(&self.groups),
            cache: self.cache.clone(),
            throttle: self.throttle.clone(),
        }
    }
}

impl<C> WriteScheduler<C>
where
    C: Clock + Clone,
{
    pub(crate) fn new(cache: CacheStore<C>, throttle: ThrottleTracker<C>) -> Self {
        Self { groups: Arc::new(Mutex::new(HashMap::new())), cache, throttle }
    }

    /// Enqueue a durable write for `key`. The returned receiver settles
    /// exactly once, with the outcome of whichever operation ends up
    /// reaching the backend.
    pub(crate) fn enqueue(
        &self,
        key: &str,
        op: WriteOp,
        max_attempts: u32,
    ) -> oneshot::Receiver<Result<WriteOutcome, RocketError>> {
        let (tx, rx) = oneshot::channel();
        let task = WriteTask { tx, remaining_attempts: max_attempts.max(1), op };

        let mut groups = self.groups.lock();
        match groups.get_mut(key) {
            Some(group) => {
                group.tasks.push(task);
                // The fresh write supersedes any pending backoff timer.
                if let Some(timer) = group.retry.take() {
                    timer.abort();
                }
                if !group.in_flight {
                    let _ = self.spawn_run(key.to_string(), Duration::ZERO);
                }
            }
            None => {
                groups.insert(
                    key.to_string(),
                    WriteGroup { tasks: vec![task], in_flight: false, retry: None },
                );
                let _ = self.spawn_run(key.to_string(), Duration::ZERO);
            }
        }

        rx
    }

    /// Number of keys with pending write groups.
    #[cfg(test)]
    pub(crate) fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }

    fn spawn_run(&self, key: String, delay: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            scheduler.run(&key).await;
        })
    }

    async fn run(&self, key: &str) {
        let op = {
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
            let op = Arc::clone(&group.tasks[group.tasks.len() - 1].op);
            // Consume the timer handle before execution starts so nothing
            // can abort a running attempt.
            group.retry = None;
            group.in_flight = true;
            op
        };

        match op().await {
            Ok(outcome) => self.settle_success(key, outcome),
            Err(error) => self.settle_failure(key, error),
        }
    }

    fn settle_success(&self, key: &str, outcome: WriteOutcome) {
        let Some(group) = self.groups.lock().remove(key) else {
            return;
        };

        // The write is confirmed durable; flip the optimistic entry.
        self.cache.mark_synchronized(key);

        debug!(key, waiters = group.tasks.len(), "write group settled");
        for task in group.tasks {
            let _ = task.tx.send(Ok(outcome.clone()));
        }

        // A success is evidence the throttling window has ended.
        if self.throttle.clear() {
            self.remind_others(key);
        }
    }

    fn settle_failure(&self, key: &str, error: BackendError) {
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
                            rejected = Some((task, RocketError::WriteAttemptsExhausted));
                        }
                    }
                }
                if group.tasks.is_empty() {
                    groups.remove(key);
                } else {
                    let delay = self.throttle.retry_delay();
                    warn!(key, ?delay, "write throttled by backend; retry scheduled");
                    group.retry = Some(self.spawn_run(key.to_string(), delay));
                }
            } else {
                if let Some(task) = group.tasks.pop() {
                    rejected = Some((task, RocketError::Backend(error)));
                }
                if group.tasks.is_empty() {
                    groups.remove(key);
                } else {
                    let delay = self.throttle.retry_delay();
                    group.retry = Some(self.spawn_run(key.to_string(), delay));
                }
                // A non-throttle error means the backoff other groups are
                // sitting out is stale.
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

    /// Re-trigger every other group immediately; called on the transition
    /// out of a restriction episode.
    fn remind_others(&self, except: &str) {
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
