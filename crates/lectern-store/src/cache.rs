//! Byte-capped content-addressed audio cache.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use lru::LruCache;
use tracing::{debug, warn};

use lectern_core::ports::{AudioCache, CacheEntry, CacheStats, StoreError};
use lectern_core::variant::VariantHash;

/// In-memory audio cache with LRU eviction on a byte cap.
///
/// Recency order comes from `lru::LruCache` (a `get` promotes); the byte
/// cap is enforced manually because eviction is by total size, not entry
/// count. The mutex is never held across an await, and `Bytes` payloads
/// make reads refcount bumps rather than copies.
pub struct MemoryAudioCache {
    entries: Mutex<LruCache<VariantHash, CacheEntry>>,
    max_size_bytes: u64,
    size_bytes: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl MemoryAudioCache {
    /// Create a cache capped at `max_size_bytes` total audio.
    #[must_use]
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            max_size_bytes,
            size_bytes: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<VariantHash, CacheEntry>> {
        self.entries.lock().expect("audio cache lock poisoned")
    }
}

#[async_trait]
impl AudioCache for MemoryAudioCache {
    async fn get(&self, variant_hash: &VariantHash) -> Result<Option<CacheEntry>, StoreError> {
        let mut entries = self.lock();
        match entries.get_mut(variant_hash) {
            Some(entry) => {
                entry.last_accessed_at = Utc::now();
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.clone()))
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        variant_hash: &VariantHash,
        audio: Bytes,
        audio_duration_ms: u64,
        model_id: &str,
        voice_id: &str,
    ) -> Result<(), StoreError> {
        let size_bytes = audio.len() as u64;
        if size_bytes > self.max_size_bytes {
            // One artifact larger than the whole cache: storing it would
            // wipe everything else for a single entry that still would not
            // fit. Serve it from the result message and move on.
            warn!(
                variant_hash = %variant_hash,
                size_bytes,
                cap = self.max_size_bytes,
                "artifact exceeds cache cap, not cached"
            );
            return Ok(());
        }

        let entry = CacheEntry {
            audio,
            audio_duration_ms,
            model_id: model_id.to_string(),
            voice_id: voice_id.to_string(),
            size_bytes,
            last_accessed_at: Utc::now(),
        };

        let mut entries = self.lock();
        // Late duplicate for the same hash: latest wins, size delta only.
        if let Some(previous) = entries.put(variant_hash.clone(), entry) {
            self.size_bytes.fetch_sub(previous.size_bytes, Ordering::Relaxed);
        }
        let mut total = self.size_bytes.fetch_add(size_bytes, Ordering::Relaxed) + size_bytes;

        while total > self.max_size_bytes {
            let Some((evicted_hash, evicted)) = entries.pop_lru() else {
                break;
            };
            total -= evicted.size_bytes;
            self.size_bytes.fetch_sub(evicted.size_bytes, Ordering::Relaxed);
            debug!(variant_hash = %evicted_hash, size_bytes = evicted.size_bytes, "evicted LRU entry");
        }
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            entry_count: self.lock().len(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(tag: &str) -> VariantHash {
        VariantHash::from_hex(tag.to_string())
    }

    fn cache(cap: u64) -> MemoryAudioCache {
        MemoryAudioCache::new(cap)
    }

    async fn put(cache: &MemoryAudioCache, tag: &str, len: usize) {
        cache
            .put(&hash(tag), Bytes::from(vec![0u8; len]), 1000, "m", "v")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_returns_what_put_stored() {
        let cache = cache(1024);
        cache
            .put(&hash("a"), Bytes::from_static(b"audio"), 2400, "m1", "v1")
            .await
            .unwrap();

        let entry = cache.get(&hash("a")).await.unwrap().unwrap();
        assert_eq!(entry.audio, Bytes::from_static(b"audio"));
        assert_eq!(entry.audio_duration_ms, 2400);
        assert_eq!(entry.model_id, "m1");
        assert_eq!(entry.size_bytes, 5);
    }

    #[tokio::test]
    async fn size_cap_is_respected_after_any_put_sequence() {
        let cache = cache(100);
        for i in 0..10 {
            put(&cache, &format!("h{i}"), 30).await;
            assert!(cache.stats().await.size_bytes <= 100);
        }
    }

    #[tokio::test]
    async fn eviction_is_least_recently_used() {
        let cache = cache(100);
        put(&cache, "old", 40).await;
        put(&cache, "warm", 40).await;

        // Touch "old" so "warm" becomes the eviction candidate.
        cache.get(&hash("old")).await.unwrap().unwrap();

        put(&cache, "new", 40).await;
        assert!(cache.get(&hash("old")).await.unwrap().is_some());
        assert!(cache.get(&hash("warm")).await.unwrap().is_none());
        assert!(cache.get(&hash("new")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_put_is_idempotent_on_size() {
        let cache = cache(1024);
        put(&cache, "a", 64).await;
        put(&cache, "a", 64).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.size_bytes, 64);
    }

    #[tokio::test]
    async fn oversized_artifact_is_not_cached_and_evicts_nothing() {
        let cache = cache(100);
        put(&cache, "resident", 80).await;
        put(&cache, "giant", 200).await;

        assert!(cache.get(&hash("giant")).await.unwrap().is_none());
        assert!(cache.get(&hash("resident")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_count_hits_and_misses() {
        let cache = cache(1024);
        put(&cache, "a", 10).await;
        cache.get(&hash("a")).await.unwrap();
        cache.get(&hash("a")).await.unwrap();
        cache.get(&hash("nope")).await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
    }
}
