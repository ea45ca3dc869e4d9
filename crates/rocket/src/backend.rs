//! The backend collaborator contract.
//!
//! The caching layer never talks to the remote store directly; every call
//! goes through [`StorageBackend`], which the embedding application supplies.
//! Only the call contract and the error classification matter here; the
//! store's internals are its own business.
//!
//! Failure signaling is structural: implementations classify rate-limiting
//! responses as [`BackendError::throttled`](crate::error::BackendError) so
//! the schedulers can decide between backoff and immediate rejection without
//! parsing error text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

/// Callback applied by the default [`StorageBackend::update`]
/// implementation.
pub type UpdateFn = Box<dyn FnOnce(Option<Value>) -> Value + Send>;

/// Paging parameters for key listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Opaque continuation token from a previous page.
    pub cursor: Option<String>,
    /// Maximum number of entries per page.
    pub page_size: Option<u32>,
}

/// One listed key together with its stored (wire-form) value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    /// The entry's key.
    pub key: String,
    /// The stored value, absent for tombstoned keys.
    pub value: Option<Value>,
}

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    /// Entries on this page.
    pub items: Vec<ListEntry>,
    /// Continuation token for the next page, absent on the last page.
    pub next_cursor: Option<String>,
}

/// Contract of the remote key-value store.
///
/// Values crossing this boundary are in wire form (see
/// [`ValueCodec`](crate::codec::ValueCodec)); the layer encodes before
/// writing and decodes after reading.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the underlying storage space, used in logs.
    fn name(&self) -> &str;

    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError>;

    /// Store `value` under `key`.
    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError>;

    /// Read-modify-write on the store itself.
    ///
    /// The caching layer computes updates locally (cache-first) and writes
    /// the result with [`set`](Self::set); this entry point is part of the
    /// collaborator contract for embedders that talk to the store directly.
    async fn update(&self, key: &str, apply: UpdateFn) -> Result<(), BackendError> {
        let prev = self.get(key).await?;
        let next = apply(prev);
        self.set(key, next).await
    }

    /// Delete `key`, returning the prior value if one was stored.
    async fn remove(&self, key: &str) -> Result<Option<Value>, BackendError>;

    /// Add `delta` to the numeric value under `key`, returning the new
    /// counter value.
    async fn increment(&self, key: &str, delta: f64) -> Result<f64, BackendError>;

    /// List stored entries.
    async fn list(&self, options: ListOptions) -> Result<ListPage, BackendError>;

    /// Tear down the storage space.
    async fn destroy(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    //! Unit tests for backend.
    use std::collections::HashMap;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    struct MapBackend {
        entries: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl StorageBackend for MapBackend {
        fn name(&self) -> &str {
            "map"
        }

        async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
            Ok(self.entries.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
            self.entries.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<Option<Value>, BackendError> {
            Ok(self.entries.lock().remove(key))
        }

        async fn increment(&self, key: &str, delta: f64) -> Result<f64, BackendError> {
            let mut entries = self.entries.lock();
            let current = entries.get(key).and_then(Value::as_f64).unwrap_or(0.0);
            let next = current + delta;
            entries.insert(key.to_string(), json!(next));
            Ok(next)
        }

        async fn list(&self, _options: ListOptions) -> Result<ListPage, BackendError> {
            Ok(ListPage::default())
        }

        async fn destroy(&self) -> Result<(), BackendError> {
            self.entries.lock().clear();
            Ok(())
        }
    }

    /// Validates the default `update` implementation for the get-apply-set
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the stored value equals the updater's output.
    #[tokio::test]
    async fn test_default_update_is_get_apply_set() {
        let backend = MapBackend { entries: Mutex::new(HashMap::new()) };
        backend.set("counter", json!(2)).await.unwrap();

        backend
            .update(
                "counter",
                Box::new(|prev| json!(prev.and_then(|v| v.as_i64()).unwrap_or(0) + 40)),
            )
            .await
            .unwrap();

        assert_eq!(backend.get("counter").await.unwrap(), Some(json!(42)));
    }

    /// Validates the default `update` implementation for the absent key
    /// scenario.
    #[tokio::test]
    async fn test_default_update_handles_missing_key() {
        let backend = MapBackend { entries: Mutex::new(HashMap::new()) };

        backend.update("fresh", Box::new(|prev| json!(prev.is_none()))).await.unwrap();

        assert_eq!(backend.get("fresh").await.unwrap(), Some(json!(true)));
    }
}
