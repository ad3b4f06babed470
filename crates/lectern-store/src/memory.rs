//! Embedded queue + results backend.
//!
//! Single-process implementation of [`JobQueue`] and [`ResultsStream`]:
//! per-model FIFOs, a processing map with claim timestamps, a DLQ vector,
//! and a results deque. All state sits behind one std mutex that is never
//! held across an await; blocking pops are built from `Notify` wakeups plus
//! the configured bounded poll.
//!
//! This backend powers tests and single-node deployments where workers run
//! in-process. Multi-machine pools use the Redis backend (feature `redis`),
//! which implements the same ports.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use lectern_core::domain::{DlqEntry, SynthesisJob, WorkerResult};
use lectern_core::ports::{ClaimedJob, JobQueue, ResultsStream, StoreError, OVERFLOW_OWNER};
use lectern_core::settings::Settings;

/// One claimed job in the processing set.
#[derive(Debug, Clone)]
struct ProcessingEntry {
    job: SynthesisJob,
    claimed_at: DateTime<Utc>,
    owner: String,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<SynthesisJob>>,
    processing: HashMap<String, HashMap<Uuid, ProcessingEntry>>,
    dlq: HashMap<String, Vec<DlqEntry>>,
    results: VecDeque<WorkerResult>,
}

/// Embedded in-memory store backend.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    job_notify: Notify,
    result_notify: Notify,
    poll_interval: Duration,
    max_retries: u32,
}

impl MemoryBackend {
    /// Create a backend with an explicit poll interval and retry budget.
    #[must_use]
    pub fn new(poll_interval: Duration, max_retries: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            job_notify: Notify::new(),
            result_notify: Notify::new(),
            poll_interval,
            max_retries,
        }
    }

    /// Create a backend configured from [`Settings`].
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Arc<Self> {
        Arc::new(Self::new(settings.queue_poll_interval(), settings.max_retries))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    fn try_pop_and_claim(&self, model_id: &str, worker_id: &str) -> Option<ClaimedJob> {
        let mut state = self.lock();
        let job = state.queues.get_mut(model_id)?.pop_front()?;
        let claimed_at = Utc::now();
        state.processing.entry(model_id.to_string()).or_default().insert(
            job.job_id,
            ProcessingEntry {
                job: job.clone(),
                claimed_at,
                owner: worker_id.to_string(),
            },
        );
        Some(ClaimedJob { job, claimed_at })
    }
}

#[async_trait]
impl JobQueue for MemoryBackend {
    async fn push(&self, model_id: &str, job: SynthesisJob) -> Result<(), StoreError> {
        self.lock().queues.entry(model_id.to_string()).or_default().push_back(job);
        self.job_notify.notify_waiters();
        Ok(())
    }

    async fn pop_and_claim(
        &self,
        model_id: &str,
        worker_id: &str,
    ) -> Result<Option<ClaimedJob>, StoreError> {
        // Arm the wakeup BEFORE checking the queue, otherwise a push landing
        // between check and wait would be missed for a full poll interval.
        let notified = self.job_notify.notified();
        if let Some(claimed) = self.try_pop_and_claim(model_id, worker_id) {
            return Ok(Some(claimed));
        }
        if timeout(self.poll_interval, notified).await.is_err() {
            return Ok(None);
        }
        Ok(self.try_pop_and_claim(model_id, worker_id))
    }

    async fn claim_job(
        &self,
        model_id: &str,
        job_id: Uuid,
        owner: &str,
    ) -> Result<Option<SynthesisJob>, StoreError> {
        let mut state = self.lock();
        let Some(queue) = state.queues.get_mut(model_id) else {
            return Ok(None);
        };
        let Some(position) = queue.iter().position(|job| job.job_id == job_id) else {
            // A local worker won the race; nothing to claim.
            return Ok(None);
        };
        let job = queue.remove(position).expect("position is in bounds");
        state.processing.entry(model_id.to_string()).or_default().insert(
            job.job_id,
            ProcessingEntry {
                job: job.clone(),
                claimed_at: Utc::now(),
                owner: owner.to_string(),
            },
        );
        Ok(Some(job))
    }

    async fn complete(&self, model_id: &str, job_id: Uuid) -> Result<(), StoreError> {
        if let Some(processing) = self.lock().processing.get_mut(model_id) {
            processing.remove(&job_id);
        }
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
        self.lock()
            .dlq
            .entry(model_id.to_string())
            .or_default()
            .push(DlqEntry::new(job, reason));
        Ok(())
    }

    async fn scan_stale(
        &self,
        model_id: &str,
        visibility_timeout_s: u64,
    ) -> Result<Vec<SynthesisJob>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(visibility_timeout_s as i64);
        let state = self.lock();
        let Some(processing) = state.processing.get(model_id) else {
            return Ok(Vec::new());
        };
        Ok(processing
            .values()
            .filter(|entry| entry.owner != OVERFLOW_OWNER && entry.claimed_at < cutoff)
            .map(|entry| entry.job.clone())
            .collect())
    }

    async fn scan_aged(
        &self,
        model_id: &str,
        overflow_threshold_s: u64,
    ) -> Result<Vec<SynthesisJob>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(overflow_threshold_s as i64);
        let state = self.lock();
        let Some(queue) = state.queues.get(model_id) else {
            return Ok(Vec::new());
        };
        Ok(queue.iter().filter(|job| job.enqueued_at < cutoff).cloned().collect())
    }

    async fn depth(&self, model_id: &str) -> Result<usize, StoreError> {
        Ok(self.lock().queues.get(model_id).map_or(0, VecDeque::len))
    }

    async fn dlq_depth(&self, model_id: &str) -> Result<usize, StoreError> {
        Ok(self.lock().dlq.get(model_id).map_or(0, Vec::len))
    }

    async fn dlq_entries(&self, model_id: &str) -> Result<Vec<DlqEntry>, StoreError> {
        Ok(self.lock().dlq.get(model_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ResultsStream for MemoryBackend {
    async fn push_result(&self, result: WorkerResult) -> Result<(), StoreError> {
        self.lock().results.push_back(result);
        self.result_notify.notify_waiters();
        Ok(())
    }

    async fn pop_result(&self) -> Result<Option<WorkerResult>, StoreError> {
        let notified = self.result_notify.notified();
        if let Some(result) = self.lock().results.pop_front() {
            return Ok(Some(result));
        }
        if timeout(self.poll_interval, notified).await.is_err() {
            return Ok(None);
        }
        Ok(self.lock().results.pop_front())
    }
}
