//! Port definitions (trait abstractions) for the storage and offload layers.
//!
//! Ports define the interfaces the coordinator expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `redis`/`reqwest`/`axum` types in any signature
//! - Every operation that touches shared state is atomic with respect to
//!   concurrent callers; the trait docs name the atomicity each caller
//!   relies on
//! - Errors are `thiserror` enums defined next to the trait

pub mod cache;
pub mod inflight;
pub mod queue;
pub mod serverless;

use thiserror::Error;
use uuid::Uuid;

pub use cache::{AudioCache, CacheEntry, CacheStats};
pub use inflight::InFlightRegistry;
pub use queue::{ClaimedJob, JobQueue, ResultsStream, OVERFLOW_OWNER};
pub use serverless::{ServerlessClient, ServerlessError, ServerlessPoll};

/// Errors surfaced by store adapters (queue, results stream, cache).
#[derive(Debug, Error)]
pub enum StoreError {
    /// `requeue` was asked to spend a retry that the budget does not cover.
    /// The caller parks the job in the DLQ instead.
    #[error("retry budget exhausted for job {job_id} (retry_count {retry_count})")]
    RetriesExhausted { job_id: Uuid, retry_count: u32 },

    /// The backing store cannot be reached. The gateway degrades (rejects
    /// synthesize requests with `store_unavailable`), scanners back off.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A payload failed to (de)serialize on its way through the store.
    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
