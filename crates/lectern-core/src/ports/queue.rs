//! Queue and results-stream ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{DlqEntry, SynthesisJob, WorkerResult};
use crate::ports::StoreError;

/// Claim owner id used by the overflow scanner.
///
/// Claims under this owner are governed by the scanner's own
/// submission-to-completion timeout, so `scan_stale` must skip them — the
/// visibility timeout is sized for local workers, not serverless round
/// trips.
pub const OVERFLOW_OWNER: &str = "overflow-scanner";

/// A job handed to exactly one claimant, with its claim timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub job: SynthesisJob,
    pub claimed_at: DateTime<Utc>,
}

/// Per-model FIFO job queues with a claim (processing) set.
///
/// Implementations keep, per `model_id`, a pending FIFO plus a processing
/// map `job_id → (job, claim_ts, owner)`. The atomicity contract:
/// `pop_and_claim` and `claim_job` move a job from pending to processing in
/// one step, so a job is never visible to two claimants. Local workers and
/// the overflow scanner compete through the same claim operations; first to
/// claim wins.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the tail of `queue:{model_id}`.
    async fn push(&self, model_id: &str, job: SynthesisJob) -> Result<(), StoreError>;

    /// Atomically move the queue head into the processing set, stamped with
    /// the claim time. Waits up to the adapter's bounded poll interval when
    /// the queue is empty, then returns `None`.
    async fn pop_and_claim(
        &self,
        model_id: &str,
        worker_id: &str,
    ) -> Result<Option<ClaimedJob>, StoreError>;

    /// Atomically claim one specific queued job (the overflow scanner's
    /// claim path). Returns `None` when the job is no longer queued — a
    /// local worker got there first.
    async fn claim_job(
        &self,
        model_id: &str,
        job_id: Uuid,
        owner: &str,
    ) -> Result<Option<SynthesisJob>, StoreError>;

    /// Remove a claim after its result was pushed. Idempotent.
    async fn complete(&self, model_id: &str, job_id: Uuid) -> Result<(), StoreError>;

    /// Increment the job's retry count and append it to the queue tail with
    /// a fresh enqueue timestamp. Fails with [`StoreError::RetriesExhausted`]
    /// when the budget (adapter-configured `max_retries`) is already spent.
    async fn requeue(&self, model_id: &str, job: SynthesisJob) -> Result<(), StoreError>;

    /// Park a job in `dlq:{model_id}` with diagnostic metadata. Terminal —
    /// nothing reads the DLQ back automatically.
    async fn dlq(&self, model_id: &str, job: SynthesisJob, reason: &str)
        -> Result<(), StoreError>;

    /// Jobs whose claim is older than `visibility_timeout_s`, excluding
    /// claims owned by [`OVERFLOW_OWNER`]. A processing entry with no
    /// readable claim timestamp also counts as stale (claimant died between
    /// the move and the stamp).
    async fn scan_stale(
        &self,
        model_id: &str,
        visibility_timeout_s: u64,
    ) -> Result<Vec<SynthesisJob>, StoreError>;

    /// Queued (unclaimed) jobs whose enqueue timestamp is older than
    /// `overflow_threshold_s`. Read-only: the jobs stay queued until
    /// claimed.
    async fn scan_aged(
        &self,
        model_id: &str,
        overflow_threshold_s: u64,
    ) -> Result<Vec<SynthesisJob>, StoreError>;

    /// Pending (unclaimed) queue depth.
    async fn depth(&self, model_id: &str) -> Result<usize, StoreError>;

    /// Dead-letter queue depth.
    async fn dlq_depth(&self, model_id: &str) -> Result<usize, StoreError>;

    /// Snapshot of the DLQ for operator inspection.
    async fn dlq_entries(&self, model_id: &str) -> Result<Vec<DlqEntry>, StoreError>;
}

/// The stream every worker pushes results to and the single consumer
/// drains.
#[async_trait]
pub trait ResultsStream: Send + Sync {
    /// Append a result. Workers always push exactly one result per claim,
    /// success or error.
    async fn push_result(&self, result: WorkerResult) -> Result<(), StoreError>;

    /// Take the oldest unconsumed result, waiting up to the adapter's
    /// bounded poll interval when the stream is empty.
    async fn pop_result(&self) -> Result<Option<WorkerResult>, StoreError>;
}
