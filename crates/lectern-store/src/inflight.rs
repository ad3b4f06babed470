//! In-flight registry: the dedup critical section.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lectern_core::domain::Subscriber;
use lectern_core::ports::InFlightRegistry;
use lectern_core::variant::VariantHash;

#[derive(Debug)]
struct InFlightRecord {
    subscribers: Vec<Subscriber>,
    #[allow(dead_code)] // surfaced in ops tooling, kept on the record
    first_seen_at: DateTime<Utc>,
}

/// Single-mutex registry. Holding the map lock across the whole
/// `register` call is what makes create-or-append atomic — concurrent
/// dispatcher calls for the same hash serialize here, and exactly one of
/// them observes the creation.
#[derive(Debug, Default)]
pub struct MemoryInFlightRegistry {
    records: Mutex<HashMap<VariantHash, InFlightRecord>>,
}

impl MemoryInFlightRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<VariantHash, InFlightRecord>> {
        self.records.lock().expect("in-flight registry lock poisoned")
    }
}

#[async_trait]
impl InFlightRegistry for MemoryInFlightRegistry {
    async fn register(&self, variant_hash: &VariantHash, subscriber: Subscriber) -> bool {
        let mut records = self.lock();
        match records.get_mut(variant_hash) {
            Some(record) => {
                if !record.subscribers.contains(&subscriber) {
                    record.subscribers.push(subscriber);
                }
                false
            }
            None => {
                records.insert(
                    variant_hash.clone(),
                    InFlightRecord {
                        subscribers: vec![subscriber],
                        first_seen_at: Utc::now(),
                    },
                );
                true
            }
        }
    }

    async fn subscribers(&self, variant_hash: &VariantHash) -> Vec<Subscriber> {
        self.lock()
            .get(variant_hash)
            .map(|record| record.subscribers.clone())
            .unwrap_or_default()
    }

    async fn clear(&self, variant_hash: &VariantHash) {
        self.lock().remove(variant_hash);
    }

    async fn in_flight_count(&self) -> usize {
        self.lock().len()
    }
}
