//! Process-wide coordinator counters.
//!
//! Plain atomics behind an `Arc` — every task records into the same
//! instance, `/api/stats` serializes a [`MetricsSnapshot`]. Latency and
//! duration totals are sums; consumers derive averages from the counts.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared counters. All increments are `Relaxed`: these are statistics,
/// not synchronization.
#[derive(Debug, Default)]
pub struct Metrics {
    completions: AtomicU64,
    synthesis_errors: AtomicU64,
    requeues: AtomicU64,
    dlq_jobs: AtomicU64,
    overflow_submitted: AtomicU64,
    overflow_completed: AtomicU64,
    overflow_failed: AtomicU64,
    processing_ms_total: AtomicU64,
    audio_ms_total: AtomicU64,
}

impl Metrics {
    /// A worker result reached the subscribers (success path).
    pub fn record_completion(&self, processing_time_ms: u64, audio_duration_ms: u64) {
        self.completions.fetch_add(1, Ordering::Relaxed);
        self.processing_ms_total.fetch_add(processing_time_ms, Ordering::Relaxed);
        self.audio_ms_total.fetch_add(audio_duration_ms, Ordering::Relaxed);
    }

    /// A worker result (or synthetic result) carried an error.
    pub fn record_synthesis_error(&self) {
        self.synthesis_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A stale or failed job went back on its queue.
    pub fn record_requeue(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
    }

    /// A job was parked in the dead-letter queue.
    pub fn record_dlq(&self) {
        self.dlq_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// One serverless submission was accepted.
    pub fn record_overflow_submitted(&self) {
        self.overflow_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// One serverless submission completed with audio.
    pub fn record_overflow_completed(&self) {
        self.overflow_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// One serverless submission failed or timed out.
    pub fn record_overflow_failed(&self) {
        self.overflow_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy for the stats endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            completions: self.completions.load(Ordering::Relaxed),
            synthesis_errors: self.synthesis_errors.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            dlq_jobs: self.dlq_jobs.load(Ordering::Relaxed),
            overflow_submitted: self.overflow_submitted.load(Ordering::Relaxed),
            overflow_completed: self.overflow_completed.load(Ordering::Relaxed),
            overflow_failed: self.overflow_failed.load(Ordering::Relaxed),
            processing_ms_total: self.processing_ms_total.load(Ordering::Relaxed),
            audio_ms_total: self.audio_ms_total.load(Ordering::Relaxed),
        }
    }
}

/// Serialized counter snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub completions: u64,
    pub synthesis_errors: u64,
    pub requeues: u64,
    pub dlq_jobs: u64,
    pub overflow_submitted: u64,
    pub overflow_completed: u64,
    pub overflow_failed: u64,
    pub processing_ms_total: u64,
    pub audio_ms_total: u64,
}
