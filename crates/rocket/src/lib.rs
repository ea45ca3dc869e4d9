//! Client-side caching and write-coalescing front for rate-limited
//! key-value stores.
//!
//! A [`StorageRocket`] sits between the application and a remote store that
//! enforces request quotas. It serves reads from a local cache when
//! possible, collapses concurrent writes to the same key into a single
//! backend call carrying only the most recent value, detects backend
//! throttling and backs off toward the next quota window, and transparently
//! compresses stored payloads.
//!
//! # How it fits together
//!
//! - [`CacheStore`] keeps one entry per key, tracking whether the value is
//!   confirmed durable (`synchronized`) and when it was last touched; a
//!   background sweep evicts idle synchronized entries.
//! - The write scheduler keeps one task group per key: at most one backend
//!   call in flight, only the newest queued operation executes, and every
//!   waiting caller settles with that one outcome.
//! - The read scheduler deduplicates concurrent lookups per key and
//!   repopulates the cache from successful reads.
//! - A [`ThrottleTracker`] per direction turns throttle errors into retry
//!   delays aimed near the backend's next quota window boundary.
//! - [`ValueCodec`] gzips values into a string-safe wire envelope.
//!
//! The remote store itself is supplied by the embedding application as a
//! [`StorageBackend`] implementation; it reports throttling structurally
//! through [`BackendError`], never by error-text matching.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use storage_rocket::{RocketOptions, StorageRocket};
//!
//! let rocket = StorageRocket::with_options(Arc::new(my_backend), RocketOptions::new());
//!
//! // Optimistic write: the cache answers immediately, the durable write
//! // coalesces with any concurrent ones.
//! rocket.set("player:42", json!({ "score": 1200 }), None).await?;
//! assert_eq!(rocket.get("player:42", None).await?, Some(json!({ "score": 1200 })));
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod backend;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod rocket;
mod sched;
pub mod stats;
pub mod throttle;
pub mod upload_group;

// Re-export commonly used types for convenience
// ------------------------------
pub use backend::{ListEntry, ListOptions, ListPage, StorageBackend, UpdateFn};
pub use cache::{CacheEntry, CacheStore};
pub use clock::{Clock, MockClock, SystemClock};
pub use codec::ValueCodec;
pub use config::{
    CleanupConfig, CompressionMode, RocketConfig, RocketOptions, UploadDefaults, UploadOptions,
};
pub use error::{BackendError, BackendErrorKind, RocketError, RocketResult};
pub use rocket::StorageRocket;
pub use stats::CacheStats;
pub use throttle::{ThrottleTracker, MAX_RETRY_DELAY, QUOTA_WINDOW};
pub use upload_group::UploadGroup;
