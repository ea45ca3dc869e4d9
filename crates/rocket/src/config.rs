//! Configuration types and the explicit merge of partial overrides.
//!
//! Settings live in plain typed structs. Partial reconfiguration goes
//! through [`RocketOptions`], an all-optional overlay merged field by field
//! with [`RocketConfig::apply`]; there is no reflective tree walk, and the
//! sweep timer is rearmed by the facade's explicit setter methods rather
//! than by assignment side effects.

use std::time::Duration;

/// Compression applied to values on their way to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Ship values as-is inside an uncompressed envelope.
    Off,
    /// Gzip the serialized value. Levels above 9 are clamped.
    Gzip {
        /// Compression level, 0 (fastest) through 9 (smallest).
        level: u32,
    },
}

impl Default for CompressionMode {
    fn default() -> Self {
        Self::Gzip { level: 6 }
    }
}

/// Expiry sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupConfig {
    /// How often the sweep runs.
    pub cleanup_interval: Duration,
    /// How long a synchronized entry may sit unaccessed before the sweep
    /// removes it.
    pub expiry_duration: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_millis(30_000),
            expiry_duration: Duration::from_millis(60_000),
        }
    }
}

/// Defaults applied to every durable write unless overridden per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadDefaults {
    /// Attempt budget for throttled retries.
    pub max_attempts: u32,
    /// Whether writes are pushed to the backend at all.
    pub upload: bool,
    /// Compression applied to outgoing values.
    pub compression: CompressionMode,
}

impl Default for UploadDefaults {
    fn default() -> Self {
        Self { max_attempts: 15, upload: true, compression: CompressionMode::default() }
    }
}

/// Live settings of a [`StorageRocket`](crate::rocket::StorageRocket)
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RocketConfig {
    /// Expiry sweep settings.
    pub cleanup: CleanupConfig,
    /// Whether the background sweep runs.
    pub enable_cache_cleaning: bool,
    /// Write defaults.
    pub upload: UploadDefaults,
}

impl Default for RocketConfig {
    fn default() -> Self {
        Self {
            cleanup: CleanupConfig::default(),
            enable_cache_cleaning: true,
            upload: UploadDefaults::default(),
        }
    }
}

impl RocketConfig {
    /// Merge a partial overlay into these settings, field by field.
    ///
    /// Zero attempt budgets and zero sweep intervals are clamped to the
    /// smallest usable values.
    pub fn apply(&mut self, options: &RocketOptions) {
        if let Some(interval) = options.cleanup_interval {
            self.cleanup.cleanup_interval = interval.max(Duration::from_millis(1));
        }
        if let Some(expiry) = options.expiry_duration {
            self.cleanup.expiry_duration = expiry;
        }
        if let Some(enabled) = options.enable_cache_cleaning {
            self.enable_cache_cleaning = enabled;
        }
        if let Some(attempts) = options.max_attempts {
            self.upload.max_attempts = attempts.max(1);
        }
        if let Some(upload) = options.upload {
            self.upload.upload = upload;
        }
        if let Some(compression) = options.compression {
            self.upload.compression = compression;
        }
    }
}

/// Partial configuration overlay with a fluent builder API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RocketOptions {
    /// Override for [`CleanupConfig::cleanup_interval`].
    pub cleanup_interval: Option<Duration>,
    /// Override for [`CleanupConfig::expiry_duration`].
    pub expiry_duration: Option<Duration>,
    /// Override for [`RocketConfig::enable_cache_cleaning`].
    pub enable_cache_cleaning: Option<bool>,
    /// Override for [`UploadDefaults::max_attempts`].
    pub max_attempts: Option<u32>,
    /// Override for [`UploadDefaults::upload`].
    pub upload: Option<bool>,
    /// Override for [`UploadDefaults::compression`].
    pub compression: Option<CompressionMode>,
}

impl RocketOptions {
    /// Create an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set the idle expiry duration.
    pub fn expiry_duration(mut self, expiry: Duration) -> Self {
        self.expiry_duration = Some(expiry);
        self
    }

    /// Enable or disable the background sweep.
    pub fn enable_cache_cleaning(mut self, enabled: bool) -> Self {
        self.enable_cache_cleaning = Some(enabled);
        self
    }

    /// Set the default attempt budget.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Enable or disable durable writes by default.
    pub fn upload(mut self, upload: bool) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Set the default compression mode.
    pub fn compression(mut self, mode: CompressionMode) -> Self {
        self.compression = Some(mode);
        self
    }
}

/// Per-call overrides for a single write operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Override for the attempt budget.
    pub max_attempts: Option<u32>,
    /// Override for whether the write is pushed to the backend.
    pub upload: Option<bool>,
    /// Override for the compression mode.
    pub compression: Option<CompressionMode>,
}

impl UploadOptions {
    /// Create an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt budget for this call.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Enable or disable the durable write for this call.
    pub fn upload(mut self, upload: bool) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Set the compression mode for this call.
    pub fn compression(mut self, mode: CompressionMode) -> Self {
        self.compression = Some(mode);
        self
    }
}
