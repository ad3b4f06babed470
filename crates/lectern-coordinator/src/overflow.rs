//! Overflow scanner: elastic burst relief via serverless offload.
//!
//! Not a failure-recovery mechanism — the visibility scanner owns that.
//! This scanner watches for jobs that have AGED in the queue (no local
//! worker got to them inside the threshold) and offloads them to the
//! configured serverless endpoint, competing with local workers through
//! the same atomic claim. Submissions are tracked in an `outstanding` map
//! across cycles and polled non-blockingly: no task ever waits out a
//! serverless synthesis.
//!
//! A serverless attempt spends from the same `max_retries` budget as local
//! attempts; failure or timeout goes through `requeue` exactly like a
//! stale claim.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lectern_core::domain::{SynthesisJob, WorkerResult};
use lectern_core::ports::{
    JobQueue, ResultsStream, ServerlessClient, ServerlessPoll, StoreError, OVERFLOW_OWNER,
};
use lectern_core::settings::Settings;
use uuid::Uuid;

use crate::metrics::Metrics;

/// One offloaded job awaiting completion.
struct OutstandingJob {
    job: SynthesisJob,
    remote_id: String,
    submitted_at: Instant,
}

/// Timer task offloading aged jobs from one model queue.
pub struct OverflowScanner {
    model_id: String,
    queue: Arc<dyn JobQueue>,
    results: Arc<dyn ResultsStream>,
    serverless: Arc<dyn ServerlessClient>,
    settings: Settings,
    metrics: Arc<Metrics>,
    outstanding: HashMap<Uuid, OutstandingJob>,
}

impl OverflowScanner {
    pub fn new(
        model_id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        results: Arc<dyn ResultsStream>,
        serverless: Arc<dyn ServerlessClient>,
        settings: Settings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            queue,
            results,
            serverless,
            settings,
            metrics,
            outstanding: HashMap::new(),
        }
    }

    /// Scan on the configured (fast) interval until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.settings.overflow_scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(model_id = %self.model_id, "overflow scanner started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.cycle().await,
            }
        }
        info!(model_id = %self.model_id, "overflow scanner stopped");
    }

    /// One cycle: claim + submit newly aged jobs, then poll outstanding.
    pub async fn cycle(&mut self) {
        self.submit_aged().await;
        self.poll_outstanding().await;
    }

    async fn submit_aged(&mut self) {
        let aged = match self
            .queue
            .scan_aged(&self.model_id, self.settings.overflow_threshold_s)
            .await
        {
            Ok(aged) => aged,
            Err(err) => {
                warn!(model_id = %self.model_id, error = %err, "aged scan failed");
                return;
            }
        };

        for candidate in aged {
            if self.outstanding.contains_key(&candidate.job_id) {
                continue;
            }
            // Atomic claim: a local worker may have popped it since the
            // scan. First claimant wins; None means we lost the race.
            let claimed = match self
                .queue
                .claim_job(&self.model_id, candidate.job_id, OVERFLOW_OWNER)
                .await
            {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(err) => {
                    warn!(model_id = %self.model_id, error = %err, "overflow claim failed");
                    continue;
                }
            };

            match self.serverless.submit(&claimed).await {
                Ok(remote_id) => {
                    debug!(
                        model_id = %self.model_id,
                        job_id = %claimed.job_id,
                        remote_id = %remote_id,
                        queue_age_s = claimed.queue_age(chrono::Utc::now()).num_seconds(),
                        "job offloaded to serverless"
                    );
                    self.metrics.record_overflow_submitted();
                    self.outstanding.insert(
                        claimed.job_id,
                        OutstandingJob {
                            job: claimed,
                            remote_id,
                            submitted_at: Instant::now(),
                        },
                    );
                }
                Err(err) => {
                    // Submission itself failed: a spent attempt, same as a
                    // serverless job failure.
                    if let Err(store_err) =
                        self.fail_attempt(claimed, &format!("serverless submit: {err}")).await
                    {
                        warn!(model_id = %self.model_id, error = %store_err, "overflow failure handling failed");
                    }
                }
            }
        }
    }

    async fn poll_outstanding(&mut self) {
        let job_ids: Vec<Uuid> = self.outstanding.keys().copied().collect();
        for job_id in job_ids {
            let (remote_id, elapsed) = {
                let entry = &self.outstanding[&job_id];
                (entry.remote_id.clone(), entry.submitted_at.elapsed())
            };

            if elapsed > self.settings.serverless_request_timeout() {
                let entry = self.outstanding.remove(&job_id).expect("entry present");
                if let Err(err) =
                    self.fail_attempt(entry.job, "serverless request timeout").await
                {
                    warn!(model_id = %self.model_id, error = %err, "overflow timeout handling failed");
                }
                continue;
            }

            match self.serverless.poll(&remote_id).await {
                Ok(ServerlessPoll::Pending) => {}
                Ok(ServerlessPoll::Completed { audio, audio_duration_ms }) => {
                    let entry = self.outstanding.remove(&job_id).expect("entry present");
                    let result = WorkerResult::success(
                        &entry.job,
                        OVERFLOW_OWNER,
                        audio,
                        audio_duration_ms,
                        entry.submitted_at.elapsed().as_millis() as u64,
                    );
                    if let Err(err) = self.finish(entry.job.job_id, result).await {
                        warn!(model_id = %self.model_id, error = %err, "overflow completion push failed");
                    } else {
                        self.metrics.record_overflow_completed();
                    }
                }
                Ok(ServerlessPoll::Failed { reason }) => {
                    let entry = self.outstanding.remove(&job_id).expect("entry present");
                    if let Err(err) = self.fail_attempt(entry.job, &reason).await {
                        warn!(model_id = %self.model_id, error = %err, "overflow failure handling failed");
                    }
                }
                Err(err) => {
                    // Transport blip while polling: leave the entry for the
                    // next cycle; the submission timeout bounds the wait.
                    debug!(
                        model_id = %self.model_id,
                        job_id = %job_id,
                        error = %err,
                        "serverless poll failed, will retry next cycle"
                    );
                }
            }
        }
    }

    /// Push a completed offload's result and drop its claim.
    async fn finish(&self, job_id: Uuid, result: WorkerResult) -> Result<(), StoreError> {
        self.results.push_result(result).await?;
        self.queue.complete(&self.model_id, job_id).await
    }

    /// Spend one retry attempt: requeue if the budget allows, otherwise
    /// DLQ + synthetic error result. Mirrors the visibility scanner.
    async fn fail_attempt(&self, job: SynthesisJob, reason: &str) -> Result<(), StoreError> {
        self.metrics.record_overflow_failed();
        self.queue.complete(&self.model_id, job.job_id).await?;

        match self.queue.requeue(&self.model_id, job.clone()).await {
            Ok(()) => {
                info!(
                    model_id = %self.model_id,
                    job_id = %job.job_id,
                    reason,
                    retry_count = job.retry_count + 1,
                    "serverless attempt failed, job requeued"
                );
                self.metrics.record_requeue();
                Ok(())
            }
            Err(StoreError::RetriesExhausted { .. }) => {
                warn!(
                    model_id = %self.model_id,
                    job_id = %job.job_id,
                    reason,
                    "retry budget spent after serverless failure, parking in DLQ"
                );
                self.queue.dlq(&self.model_id, job.clone(), reason).await?;
                self.metrics.record_dlq();
                self.results
                    .push_result(WorkerResult::failure(&job, OVERFLOW_OWNER, reason, 0))
                    .await
            }
            Err(err) => Err(err),
        }
    }
}
