//! Coordinator settings and validation.
//!
//! One read-only struct, loaded at startup and injected into the scanners,
//! the consumer, and the gateway. Nothing mutates it after boot.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default gateway HTTP/WS port.
pub const DEFAULT_PORT: u16 = 9870;

/// Default audio cache cap (512 MiB).
pub const DEFAULT_CACHE_MAX_SIZE_BYTES: u64 = 512 * 1024 * 1024;

/// Process-wide configuration.
///
/// Every field has a serde default, so a partial JSON file (or none at all)
/// yields a runnable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Maximum retry attempts across all classes (local timeouts and
    /// serverless failures share this budget) before a job is parked in
    /// the DLQ.
    pub max_retries: u32,

    /// Age threshold for a worker claim being considered abandoned.
    pub visibility_timeout_s: u64,

    /// Period of the visibility scanner.
    pub visibility_scan_interval_s: u64,

    /// Age threshold for a queued job being eligible for serverless
    /// offload.
    pub overflow_threshold_s: u64,

    /// Period of the overflow scanner.
    pub overflow_scan_interval_s: u64,

    /// Serverless endpoint to offload aged jobs to. `None` disables the
    /// overflow scanner entirely.
    pub serverless_endpoint: Option<String>,

    /// Submission-to-completion timeout per offloaded job.
    pub serverless_request_timeout_s: u64,

    /// Audio cache capacity; LRU eviction keeps total size under this.
    pub cache_max_size_bytes: u64,

    /// Name of the stream the result consumer drains.
    pub results_stream_key: String,

    /// Prefix under which per-model queues live (`{prefix}:{model_id}`).
    pub queue_key_prefix: String,

    /// Bounded wait for empty-queue / empty-stream pops.
    pub queue_poll_interval_ms: u64,

    /// Cursor-eviction lookahead: `cursor_moved` keeps pending blocks in
    /// `[cursor, cursor + pending_window]`.
    pub pending_window: u32,

    /// Gateway HTTP/WS port.
    pub port: u16,

    /// Model queues the scanners watch. Dispatch itself is driven by the
    /// `model_id` on each request.
    pub models: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            visibility_timeout_s: 30,
            visibility_scan_interval_s: 5,
            overflow_threshold_s: 10,
            overflow_scan_interval_s: 2,
            serverless_endpoint: None,
            serverless_request_timeout_s: 120,
            cache_max_size_bytes: DEFAULT_CACHE_MAX_SIZE_BYTES,
            results_stream_key: "results".to_string(),
            queue_key_prefix: "queue".to_string(),
            queue_poll_interval_ms: 250,
            pending_window: 64,
            port: DEFAULT_PORT,
            models: vec!["standard".to_string()],
        }
    }
}

impl Settings {
    /// Visibility timeout as a [`Duration`].
    #[must_use]
    pub const fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_s)
    }

    /// Visibility scanner period as a [`Duration`].
    #[must_use]
    pub const fn visibility_scan_interval(&self) -> Duration {
        Duration::from_secs(self.visibility_scan_interval_s)
    }

    /// Overflow scanner period as a [`Duration`].
    #[must_use]
    pub const fn overflow_scan_interval(&self) -> Duration {
        Duration::from_secs(self.overflow_scan_interval_s)
    }

    /// Per-offload timeout as a [`Duration`].
    #[must_use]
    pub const fn serverless_request_timeout(&self) -> Duration {
        Duration::from_secs(self.serverless_request_timeout_s)
    }

    /// Bounded poll interval as a [`Duration`].
    #[must_use]
    pub const fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    /// Whether serverless overflow is enabled.
    #[must_use]
    pub const fn overflow_enabled(&self) -> bool {
        self.serverless_endpoint.is_some()
    }
}

/// Settings validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("cacheMaxSizeBytes must be greater than zero")]
    ZeroCacheCap,

    #[error("models must name at least one queue")]
    NoModels,

    #[error("serverlessEndpoint is not a valid http(s) URL: {0}")]
    BadEndpoint(String),
}

/// Validate a settings struct before wiring anything with it.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    for (name, value) in [
        ("visibilityTimeoutS", settings.visibility_timeout_s),
        ("visibilityScanIntervalS", settings.visibility_scan_interval_s),
        ("overflowThresholdS", settings.overflow_threshold_s),
        ("overflowScanIntervalS", settings.overflow_scan_interval_s),
        ("serverlessRequestTimeoutS", settings.serverless_request_timeout_s),
        ("queuePollIntervalMs", settings.queue_poll_interval_ms),
    ] {
        if value == 0 {
            return Err(SettingsError::ZeroDuration(name));
        }
    }
    if settings.cache_max_size_bytes == 0 {
        return Err(SettingsError::ZeroCacheCap);
    }
    if settings.models.is_empty() || settings.models.iter().any(String::is_empty) {
        return Err(SettingsError::NoModels);
    }
    if let Some(endpoint) = &settings.serverless_endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(SettingsError::BadEndpoint(endpoint.clone()));
        }
    }
    Ok(())
}
