//! Visibility scanner: reaps abandoned worker claims.
//!
//! A stuck claim almost always means the worker crashed between claim and
//! result push. Requeueing is safe because the pipeline is idempotent on
//! the variant hash: if the original worker's completion arrives late, the
//! consumer still publishes correctly and the duplicate cache put is
//! harmless.

use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lectern_core::domain::{SynthesisJob, WorkerResult};
use lectern_core::ports::{JobQueue, ResultsStream, StoreError};
use lectern_core::settings::Settings;

use crate::metrics::Metrics;

/// Synthetic-result producer id for scanner-generated error results.
const SCANNER_ID: &str = "visibility-scanner";

/// Timer task watching one model queue for stale claims.
pub struct VisibilityScanner {
    model_id: String,
    queue: Arc<dyn JobQueue>,
    results: Arc<dyn ResultsStream>,
    settings: Settings,
    metrics: Arc<Metrics>,
}

impl VisibilityScanner {
    pub fn new(
        model_id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        results: Arc<dyn ResultsStream>,
        settings: Settings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            queue,
            results,
            settings,
            metrics,
        }
    }

    /// Scan on the configured interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.settings.visibility_scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(model_id = %self.model_id, "visibility scanner started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.scan_once().await,
            }
        }
        info!(model_id = %self.model_id, "visibility scanner stopped");
    }

    /// One pass: collect stale claims, decide requeue vs DLQ per job.
    pub async fn scan_once(&self) {
        let stale = match self
            .queue
            .scan_stale(&self.model_id, self.settings.visibility_timeout_s)
            .await
        {
            Ok(stale) => stale,
            Err(err) => {
                // Store hiccup: skip this tick, the interval is the backoff.
                warn!(model_id = %self.model_id, error = %err, "stale scan failed");
                return;
            }
        };

        for job in stale {
            if let Err(err) = self.handle_stale(job).await {
                warn!(model_id = %self.model_id, error = %err, "stale claim handling failed");
            }
        }
    }

    async fn handle_stale(&self, job: SynthesisJob) -> Result<(), StoreError> {
        // Clear the dead claim first so neither branch leaves a duplicate
        // processing entry behind.
        self.queue.complete(&self.model_id, job.job_id).await?;

        match self.queue.requeue(&self.model_id, job.clone()).await {
            Ok(()) => {
                info!(
                    model_id = %self.model_id,
                    job_id = %job.job_id,
                    retry_count = job.retry_count + 1,
                    "stale claim requeued"
                );
                self.metrics.record_requeue();
                Ok(())
            }
            Err(StoreError::RetriesExhausted { .. }) => {
                warn!(
                    model_id = %self.model_id,
                    job_id = %job.job_id,
                    retry_count = job.retry_count,
                    "retry budget spent, parking in DLQ"
                );
                self.queue.dlq(&self.model_id, job.clone(), "retries_exhausted").await?;
                self.metrics.record_dlq();
                // Synthetic error result: the consumer notifies every
                // subscriber and clears the in-flight record.
                self.results
                    .push_result(WorkerResult::failure(&job, SCANNER_ID, "retries_exhausted", 0))
                    .await
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use lectern_core::variant::VariantHash;
    use lectern_store::MemoryBackend;

    use super::*;

    fn job(text: &str) -> SynthesisJob {
        SynthesisJob::new(
            VariantHash::compute(text, "m1", "v1", &BTreeMap::new()),
            0,
            "doc",
            "user",
            "m1",
            "v1",
            BTreeMap::new(),
            text,
            None,
        )
    }

    fn scanner(backend: &Arc<MemoryBackend>, max_retries: u32) -> VisibilityScanner {
        let settings = Settings {
            max_retries,
            visibility_timeout_s: 1,
            ..Settings::default()
        };
        VisibilityScanner::new(
            "m1",
            Arc::clone(backend) as Arc<dyn JobQueue>,
            Arc::clone(backend) as Arc<dyn ResultsStream>,
            settings,
            Arc::new(Metrics::default()),
        )
    }

    #[tokio::test]
    async fn fresh_claims_are_left_alone() {
        let backend = Arc::new(MemoryBackend::new(Duration::from_millis(10), 3));
        backend.push("m1", job("a")).await.unwrap();
        backend.pop_and_claim("m1", "w1").await.unwrap().unwrap();

        scanner(&backend, 3).scan_once().await;
        assert_eq!(backend.depth("m1").await.unwrap(), 0, "fresh claim must not requeue");
    }

    #[tokio::test]
    async fn stale_claim_is_requeued_with_bumped_retry() {
        let backend = Arc::new(MemoryBackend::new(Duration::from_millis(10), 3));
        backend.push("m1", job("a")).await.unwrap();
        let claimed = backend.pop_and_claim("m1", "w1").await.unwrap().unwrap();

        // Zero visibility timeout: the claim is immediately stale.
        let sc = VisibilityScanner::new(
            "m1",
            Arc::clone(&backend) as Arc<dyn JobQueue>,
            Arc::clone(&backend) as Arc<dyn ResultsStream>,
            Settings { visibility_timeout_s: 1, ..Settings::default() },
            Arc::new(Metrics::default()),
        );
        // Simulate age by scanning with the real timeout but a claim made
        // in the past: use a 0-second scan directly on the port.
        let stale = backend.scan_stale("m1", 0).await.unwrap();
        assert_eq!(stale.len(), 1);
        for j in stale {
            sc.handle_stale(j).await.unwrap();
        }

        let requeued = backend.pop_and_claim("m1", "w2").await.unwrap().unwrap();
        assert_eq!(requeued.job.job_id, claimed.job.job_id);
        assert_eq!(requeued.job.retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_job_goes_to_dlq_with_synthetic_error_result() {
        let backend = Arc::new(MemoryBackend::new(Duration::from_millis(10), 2));
        let mut exhausted = job("a");
        exhausted.retry_count = 2;
        backend.push("m1", exhausted).await.unwrap();
        backend.pop_and_claim("m1", "w1").await.unwrap().unwrap();

        let sc = scanner(&backend, 2);
        let stale = backend.scan_stale("m1", 0).await.unwrap();
        for j in stale {
            sc.handle_stale(j).await.unwrap();
        }

        assert_eq!(backend.dlq_depth("m1").await.unwrap(), 1);
        assert_eq!(backend.depth("m1").await.unwrap(), 0);
        let synthetic = backend.pop_result().await.unwrap().unwrap();
        assert!(synthetic.is_error());
        assert_eq!(synthetic.error.as_deref(), Some("retries_exhausted"));
        assert_eq!(synthetic.worker_id, "visibility-scanner");
    }
}
