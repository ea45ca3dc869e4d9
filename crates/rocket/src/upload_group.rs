//! Key-bound convenience view over [`StorageRocket`].
//!
//! An [`UploadGroup`] stages writes for one key in the cache only and pushes
//! the accumulated state to the backend in a single durable write when
//! [`upload`](UploadGroup::upload) is called. Useful when a key is mutated
//! many times in a burst and only the final state matters.

use std::sync::Arc;

use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::config::UploadOptions;
use crate::error::{RocketError, RocketResult};
use crate::rocket::StorageRocket;
use crate::sched::write::{WriteOp, WriteOutcome};

/// A per-key view that stages writes locally and pushes on demand.
pub struct UploadGroup<C = SystemClock>
where
    C: Clock + Clone,
{
    rocket: StorageRocket<C>,
    key: String,
}

impl<C> UploadGroup<C>
where
    C: Clock + Clone,
{
    pub(crate) fn new(rocket: StorageRocket<C>, key: String) -> Self {
        Self { rocket, key }
    }

    /// The key this group is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stage a value in the cache without pushing it to the backend.
    pub async fn set(&self, value: Value, max_attempts: Option<u32>) -> RocketResult<()> {
        self.rocket.set(&self.key, value, Some(Self::staged(max_attempts))).await
    }

    /// Stage the result of `updater` applied to the current value.
    pub async fn update<F>(&self, updater: F, max_attempts: Option<u32>) -> RocketResult<()>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        self.rocket.update(&self.key, updater, Some(Self::staged(max_attempts))).await
    }

    /// Stage an increment of the cached numeric value.
    pub async fn increment(
        &self,
        delta: Option<f64>,
        max_attempts: Option<u32>,
    ) -> RocketResult<f64> {
        self.rocket.increment(&self.key, delta, Some(Self::staged(max_attempts))).await
    }

    /// Push the staged cache state through the write scheduler: a backend
    /// remove when the staged data is absent, a set otherwise.
    ///
    /// Errors with [`RocketError::AlreadySynchronized`] when the entry is
    /// already confirmed durable and [`RocketError::NothingPending`] when
    /// nothing is staged. Returns the decoded prior value when the push was
    /// a removal.
    pub async fn upload(&self, options: Option<UploadOptions>) -> RocketResult<Option<Value>> {
        let entry = self
            .rocket
            .cache
            .get(&self.key)
            .ok_or_else(|| RocketError::NothingPending { key: self.key.clone() })?;
        if entry.synchronized {
            return Err(RocketError::AlreadySynchronized { key: self.key.clone() });
        }

        let (attempts, _, codec) = self.rocket.write_settings(options);
        let backend = Arc::clone(&self.rocket.backend);
        let key = self.key.clone();

        let op: WriteOp = match entry.data {
            None => Arc::new(move || {
                let backend = Arc::clone(&backend);
                let key = key.clone();
                Box::pin(async move {
                    let prior = backend.remove(&key).await?;
                    Ok(WriteOutcome::Removed(prior.map(|wire| codec.decode(&wire))))
                })
            }),
            Some(data) => {
                let wire = codec.encode(&data);
                Arc::new(move || {
                    let backend = Arc::clone(&backend);
                    let key = key.clone();
                    let wire = wire.clone();
                    Box::pin(async move {
                        backend.set(&key, wire).await.map(|_| WriteOutcome::Ack)
                    })
                })
            }
        };

        let rx = self.rocket.writes.enqueue(&self.key, op, attempts);
        match rx.await.map_err(|_| RocketError::TaskDropped)?? {
            WriteOutcome::Removed(prior) => Ok(prior),
            _ => Ok(None),
        }
    }

    fn staged(max_attempts: Option<u32>) -> UploadOptions {
        UploadOptions { max_attempts, upload: Some(false), compression: None }
    }
}
