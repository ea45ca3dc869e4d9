//! Per-key task scheduling: read deduplication and write coalescing.
//!
//! Both schedulers share the same shape: a map from key to a group of
//! pending callers, a single-flight guard so at most one backend call is in
//! flight per group, and a retry timer driven by the direction's
//! [`ThrottleTracker`](crate::throttle::ThrottleTracker). The write side
//! additionally coalesces: only the newest enqueued operation ever reaches
//! the backend, but every waiter in the group settles with that one
//! outcome.

pub(crate) mod read;
pub(crate) mod write;
