//! In-flight registry port: which variants are being synthesized, and who
//! is waiting.

use async_trait::async_trait;

use crate::domain::Subscriber;
use crate::variant::VariantHash;

/// Registry of variants with a job in a queue or claim set and the
/// subscribers waiting on each.
///
/// `register` is THE critical section of the dedup design: its
/// create-or-append must be atomic across concurrent dispatcher calls, so
/// exactly one caller ever observes `true` for a given record lifetime —
/// that caller is the one that also enqueues the job.
///
/// A record exists iff a job with its hash is enqueued or processing; the
/// result consumer clears it after publishing done messages — on the error
/// path too, or a permanently failing variant would dedupe forever.
#[async_trait]
pub trait InFlightRegistry: Send + Sync {
    /// Append a subscriber, creating the record if absent. Returns `true`
    /// only for the call that created the record. Re-registering an
    /// identical subscriber is a no-op (still returns `false`).
    async fn register(&self, variant_hash: &VariantHash, subscriber: Subscriber) -> bool;

    /// Everyone currently waiting on this variant.
    async fn subscribers(&self, variant_hash: &VariantHash) -> Vec<Subscriber>;

    /// Drop the record. Idempotent.
    async fn clear(&self, variant_hash: &VariantHash);

    /// Number of in-flight variants (observability).
    async fn in_flight_count(&self) -> usize;
}
