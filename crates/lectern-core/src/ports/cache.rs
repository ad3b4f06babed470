//! Content-addressed audio cache port.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ports::StoreError;
use crate::variant::VariantHash;

/// One cached artifact. Immutable once written; a late duplicate result for
/// the same hash may overwrite it (latest wins, audio is byte-equivalent by
/// construction of the content address).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The rendered audio. `Bytes` so reads are refcounted, not copied.
    pub audio: Bytes,
    pub audio_duration_ms: u64,
    pub model_id: String,
    pub voice_id: String,
    pub size_bytes: u64,
    /// Updated by every `get`; drives LRU eviction order.
    pub last_accessed_at: DateTime<Utc>,
}

/// Observability snapshot for `/api/stats`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size_bytes: u64,
    pub entry_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// The single source of truth for rendered audio.
///
/// The result consumer is the sole writer; the dispatcher and the audio
/// route read. Reads during a write observe the pre-write state.
#[async_trait]
pub trait AudioCache: Send + Sync {
    /// Look up an artifact; a hit refreshes its recency.
    async fn get(&self, variant_hash: &VariantHash) -> Result<Option<CacheEntry>, StoreError>;

    /// Store an artifact, evicting least-recently-used entries until the
    /// total size fits the configured cap.
    async fn put(
        &self,
        variant_hash: &VariantHash,
        audio: Bytes,
        audio_duration_ms: u64,
        model_id: &str,
        voice_id: &str,
    ) -> Result<(), StoreError>;

    /// Size/hit-rate counters.
    async fn stats(&self) -> CacheStats;
}
