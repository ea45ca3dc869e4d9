//! Error types for the caching and write-coalescing layer.
//!
//! Two layers of errors exist here:
//!
//! 1. [`BackendError`] is what the backend collaborator reports. It carries a
//!    structured [`BackendErrorKind`] so the schedulers can distinguish a
//!    throttling signal from an ordinary failure without inspecting error
//!    text.
//! 2. [`RocketError`] is what callers of the facade observe: terminal
//!    exhaustion errors (one per direction), pass-through backend failures,
//!    and the synchronous precondition failures raised without any backend
//!    call.

use thiserror::Error;

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The store is rate limiting this direction; the operation is safe to
    /// retry after a backoff.
    Throttled,
    /// Any other failure; surfaced to the affected caller immediately.
    Other,
}

/// Error reported by the backend collaborator.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
}

impl BackendError {
    /// Create a throttling error.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self { kind: BackendErrorKind::Throttled, message: message.into() }
    }

    /// Create a non-throttling error.
    pub fn other(message: impl Into<String>) -> Self {
        Self { kind: BackendErrorKind::Other, message: message.into() }
    }

    /// The failure classification.
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Whether this failure is a rate-limiting signal.
    pub fn is_throttled(&self) -> bool {
        self.kind == BackendErrorKind::Throttled
    }

    /// The backend-supplied message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced by the facade operations.
#[derive(Debug, Error)]
pub enum RocketError {
    /// A read kept hitting the throttle until its attempt budget ran out.
    #[error("failed to read data from the backend store: retry attempts exhausted")]
    ReadAttemptsExhausted,

    /// A write kept hitting the throttle until its attempt budget ran out.
    #[error("failed to write data to the backend store: retry attempts exhausted")]
    WriteAttemptsExhausted,

    /// `increment` targeted a cached value that is not a number. Raised
    /// synchronously; no backend call is made.
    #[error("cached value for key '{key}' is not numeric and cannot be incremented")]
    NonNumericValue { key: String },

    /// An upload-group push targeted an entry already confirmed durable.
    #[error("value for key '{key}' is already synchronized with the backend")]
    AlreadySynchronized { key: String },

    /// An upload-group push targeted a key with no staged entry.
    #[error("no pending value to push for key '{key}'")]
    NothingPending { key: String },

    /// Non-throttling backend failure, surfaced to the single affected
    /// caller.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The scheduler went away before settling the caller's task.
    #[error("pending task was dropped before completion")]
    TaskDropped,
}

/// Result type for facade operations.
pub type RocketResult<T> = Result<T, RocketError>;
