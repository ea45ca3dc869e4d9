//! Per-direction rate-limit tracking and retry delay computation.
//!
//! Each direction (read, write) owns one [`ThrottleTracker`]. A restriction
//! episode starts at the first observed throttle error and ends on the first
//! success or first non-throttle error. While an episode is active, retries
//! are aimed near the next boundary of the backend's assumed rolling
//! one-minute quota window, capped to keep waits bounded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Rolling quota window the backend is assumed to enforce.
pub const QUOTA_WINDOW: Duration = Duration::from_millis(60_000);

/// Upper bound on any single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(45_000);

/// Tracks one direction's restriction episode.
///
/// Clones share the same episode state, so a tracker handed to a scheduler
/// stays observable from the facade.
pub struct ThrottleTracker<C = SystemClock>
where
    C: Clock + Clone,
{
    direction: &'static str,
    since: Arc<Mutex<Option<Instant>>>,
    clock: C,
}

impl<C> ThrottleTracker<C>
where
    C: Clock + Clone,
{
    /// Create an unrestricted tracker. `direction` shows up in logs.
    pub fn new(direction: &'static str, clock: C) -> Self {
        Self { direction, since: Arc::new(Mutex::new(None)), clock }
    }

    /// Record a throttle observation. Only the first one in an episode sets
    /// the start time.
    pub fn mark(&self) {
        let mut since = self.since.lock();
        if since.is_none() {
            *since = Some(self.clock.now());
            debug!(
                direction = self.direction,
                "backend throttling detected; restriction episode started"
            );
        }
    }

    /// End the episode. Returns `true` when one was active.
    pub fn clear(&self) -> bool {
        let was_restricted = self.since.lock().take().is_some();
        if was_restricted {
            debug!(direction = self.direction, "restriction episode ended");
        }
        was_restricted
    }

    /// Whether a restriction episode is currently active.
    pub fn is_restricted(&self) -> bool {
        self.since.lock().is_some()
    }

    /// Delay before the next retry: the time remaining until the next quota
    /// window boundary, capped at [`MAX_RETRY_DELAY`]. Zero when no episode
    /// is active.
    pub fn retry_delay(&self) -> Duration {
        let Some(since) = *self.since.lock() else {
            return Duration::ZERO;
        };

        let elapsed = self.clock.now().saturating_duration_since(since).as_millis() as u64;
        let window = QUOTA_WINDOW.as_millis() as u64;
        let until_boundary = window - (elapsed % window);

        Duration::from_millis(until_boundary.min(MAX_RETRY_DELAY.as_millis() as u64))
    }
}

impl<C> Clone for ThrottleTracker<C>
where
    C: Clock + Clone,
{
    fn clone(&self) -> Self {
        Self {
            direction: self.direction,
            since: Arc::clone(&self.since),
            clock: self.clock.clone(),
        }
    }
}
