//! Shared-store backend on Redis (cargo feature `redis`).
//!
//! Key layout, per model queue (`{prefix}` is `Settings::queue_key_prefix`):
//!
//! | Key | Type | Contents |
//! |---|---|---|
//! | `{prefix}:{model}` | list | pending job envelopes (JSON), head = oldest |
//! | `{prefix}:{model}:processing` | hash | `job_id → envelope` for claimed jobs |
//! | `{prefix}:{model}:claims` | hash | `job_id → "{epoch_secs}\|{owner}"` |
//! | `dlq:{model}` | list | [`DlqEntry`] envelopes |
//! | `{results_key}` | list | [`WorkerResult`] envelopes |
//!
//! Claims are taken by a Lua script so queue-pop and processing-insert are
//! one atomic step — a job is never visible to two claimants. The claim
//! timestamp is written in the same script; a processing entry without a
//! readable claim stamp is treated as stale by `scan_stale`, which covers
//! any historical entry written by a claimant that died mid-claim.
//!
//! Connection care is delegated to [`ConnectionManager`]: it reconnects
//! internally, and every error here surfaces as
//! [`StoreError::Unavailable`] so callers apply their own backoff.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
// Leading `::` disambiguates the extern crate from this module's own path.
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use tracing::{debug, warn};
use uuid::Uuid;

use lectern_core::domain::{DlqEntry, SynthesisJob, WorkerResult};
use lectern_core::ports::{ClaimedJob, JobQueue, ResultsStream, StoreError, OVERFLOW_OWNER};
use lectern_core::settings::Settings;

/// Atomically pop the queue head into the processing + claims hashes.
/// KEYS: queue, processing, claims. ARGV: epoch_secs, owner.
const POP_AND_CLAIM: &str = r"
local payload = redis.call('LPOP', KEYS[1])
if not payload then return false end
local job = cjson.decode(payload)
redis.call('HSET', KEYS[2], job['jobId'], payload)
redis.call('HSET', KEYS[3], job['jobId'], ARGV[1] .. '|' .. ARGV[2])
return payload
";

/// Atomically claim one specific queued job (overflow path).
/// KEYS: queue, processing, claims. ARGV: epoch_secs, owner, job_id.
const CLAIM_JOB: &str = r"
local entries = redis.call('LRANGE', KEYS[1], 0, -1)
for _, payload in ipairs(entries) do
  local job = cjson.decode(payload)
  if job['jobId'] == ARGV[3] then
    redis.call('LREM', KEYS[1], 1, payload)
    redis.call('HSET', KEYS[2], ARGV[3], payload)
    redis.call('HSET', KEYS[3], ARGV[3], ARGV[1] .. '|' .. ARGV[2])
    return payload
  end
end
return false
";

/// Redis-backed [`JobQueue`] + [`ResultsStream`].
pub struct RedisBackend {
    conn: ConnectionManager,
    queue_key_prefix: String,
    results_key: String,
    poll_interval: Duration,
    max_retries: u32,
    pop_and_claim: Script,
    claim_job: Script,
}

impl RedisBackend {
    /// Connect to `url` and configure keys/budgets from [`Settings`].
    pub async fn connect(url: &str, settings: &Settings) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url).map_err(to_store_error)?;
        let conn = ConnectionManager::new(client).await.map_err(to_store_error)?;
        Ok(Self {
            conn,
            queue_key_prefix: settings.queue_key_prefix.clone(),
            results_key: settings.results_stream_key.clone(),
            poll_interval: settings.queue_poll_interval(),
            max_retries: settings.max_retries,
            pop_and_claim: Script::new(POP_AND_CLAIM),
            claim_job: Script::new(CLAIM_JOB),
        })
    }

    fn queue_key(&self, model_id: &str) -> String {
        format!("{}:{model_id}", self.queue_key_prefix)
    }

    fn processing_key(&self, model_id: &str) -> String {
        format!("{}:{model_id}:processing", self.queue_key_prefix)
    }

    fn claims_key(&self, model_id: &str) -> String {
        format!("{}:{model_id}:claims", self.queue_key_prefix)
    }

    fn dlq_key(model_id: &str) -> String {
        format!("dlq:{model_id}")
    }

    async fn try_pop_and_claim(
        &self,
        model_id: &str,
        worker_id: &str,
    ) -> Result<Option<ClaimedJob>, StoreError> {
        let mut conn = self.conn.clone();
        let claimed_at = Utc::now();
        let payload: Option<String> = self
            .pop_and_claim
            .key(self.queue_key(model_id))
            .key(self.processing_key(model_id))
            .key(self.claims_key(model_id))
            .arg(claimed_at.timestamp())
            .arg(worker_id)
            .invoke_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        match payload {
            Some(payload) => {
                let job: SynthesisJob = serde_json::from_str(&payload)?;
                Ok(Some(ClaimedJob { job, claimed_at }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl JobQueue for RedisBackend {
    async fn push(&self, model_id: &str, job: SynthesisJob) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(self.queue_key(model_id), payload)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn pop_and_claim(
        &self,
        model_id: &str,
        worker_id: &str,
    ) -> Result<Option<ClaimedJob>, StoreError> {
        if let Some(claimed) = self.try_pop_and_claim(model_id, worker_id).await? {
            return Ok(Some(claimed));
        }
        // Bounded poll: the claim script cannot block server-side, so the
        // empty case waits one interval and retries once.
        tokio::time::sleep(self.poll_interval).await;
        self.try_pop_and_claim(model_id, worker_id).await
    }

    async fn claim_job(
        &self,
        model_id: &str,
        job_id: Uuid,
        owner: &str,
    ) -> Result<Option<SynthesisJob>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = self
            .claim_job
            .key(self.queue_key(model_id))
            .key(self.processing_key(model_id))
            .key(self.claims_key(model_id))
            .arg(Utc::now().timestamp())
            .arg(owner)
            .arg(job_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        payload.map(|p| serde_json::from_str(&p)).transpose().map_err(StoreError::from)
    }

    async fn complete(&self, model_id: &str, job_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let id = job_id.to_string();
        let _: () = conn
            .hdel(self.processing_key(model_id), &id)
            .await
            .map_err(to_store_error)?;
        let _: () = conn
            .hdel(self.claims_key(model_id), &id)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn requeue(&self, model_id: &str, mut job: SynthesisJob) -> Result<(), StoreError> {
        if job.retry_count >= self.max_retries {
            return Err(StoreError::RetriesExhausted {
                job_id: job.job_id,
                retry_count: job.retry_count,
            });
        }
        job.retry_count += 1;
        job.enqueued_at = Utc::now();
        debug!(job_id = %job.job_id, retry_count = job.retry_count, "requeueing job");
        self.push(model_id, job).await
    }

    async fn dlq(
        &self,
        model_id: &str,
        job: SynthesisJob,
        reason: &str,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&DlqEntry::new(job, reason))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(Self::dlq_key(model_id), payload)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn scan_stale(
        &self,
        model_id: &str,
        visibility_timeout_s: u64,
    ) -> Result<Vec<SynthesisJob>, StoreError> {
        let mut conn = self.conn.clone();
        let processing: std::collections::HashMap<String, String> = conn
            .hgetall(self.processing_key(model_id))
            .await
            .map_err(to_store_error)?;
        let claims: std::collections::HashMap<String, String> = conn
            .hgetall(self.claims_key(model_id))
            .await
            .map_err(to_store_error)?;

        let cutoff = Utc::now() - chrono::Duration::seconds(visibility_timeout_s as i64);
        let mut stale = Vec::new();
        for (job_id, payload) in &processing {
            match claims.get(job_id).and_then(|stamp| parse_claim(stamp)) {
                Some((claimed_at, owner)) => {
                    if owner != OVERFLOW_OWNER && claimed_at < cutoff {
                        stale.push(serde_json::from_str(payload)?);
                    }
                }
                // No readable stamp: the claimant died mid-claim.
                None => {
                    warn!(job_id = %job_id, "processing entry without claim stamp, treating as stale");
                    stale.push(serde_json::from_str(payload)?);
                }
            }
        }
        Ok(stale)
    }

    async fn scan_aged(
        &self,
        model_id: &str,
        overflow_threshold_s: u64,
    ) -> Result<Vec<SynthesisJob>, StoreError> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn
            .lrange(self.queue_key(model_id), 0, -1)
            .await
            .map_err(to_store_error)?;
        let cutoff = Utc::now() - chrono::Duration::seconds(overflow_threshold_s as i64);
        let mut aged = Vec::new();
        for payload in &entries {
            let job: SynthesisJob = serde_json::from_str(payload)?;
            if job.enqueued_at < cutoff {
                aged.push(job);
            }
        }
        Ok(aged)
    }

    async fn depth(&self, model_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(self.queue_key(model_id)).await.map_err(to_store_error)?;
        Ok(len)
    }

    async fn dlq_depth(&self, model_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(Self::dlq_key(model_id)).await.map_err(to_store_error)?;
        Ok(len)
    }

    async fn dlq_entries(&self, model_id: &str) -> Result<Vec<DlqEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn
            .lrange(Self::dlq_key(model_id), 0, -1)
            .await
            .map_err(to_store_error)?;
        entries
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl ResultsStream for RedisBackend {
    async fn push_result(&self, result: WorkerResult) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&result)?;
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(&self.results_key, payload).await.map_err(to_store_error)?;
        Ok(())
    }

    async fn pop_result(&self) -> Result<Option<WorkerResult>, StoreError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn
            .blpop(&self.results_key, self.poll_interval.as_secs_f64())
            .await
            .map_err(to_store_error)?;
        popped
            .map(|(_key, payload)| serde_json::from_str(&payload))
            .transpose()
            .map_err(StoreError::from)
    }
}

fn to_store_error(err: ::redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Parse a `"{epoch_secs}|{owner}"` claim stamp.
fn parse_claim(stamp: &str) -> Option<(DateTime<Utc>, String)> {
    let (secs, owner) = stamp.split_once('|')?;
    let claimed_at = Utc.timestamp_opt(secs.parse().ok()?, 0).single()?;
    Some((claimed_at, owner.to_string()))
}
