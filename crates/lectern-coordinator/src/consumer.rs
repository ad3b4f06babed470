//! The result consumer — single drainer of the results stream.
//!
//! Ownership discipline (the backbone of the concurrency model): this task
//! is the ONLY writer of the audio cache, the ONLY publisher of done
//! messages, and the ONLY deleter of in-flight records. Everything else
//! either reads or owns different keys, so no lock spans components.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lectern_core::domain::{StatusMessage, WorkerResult, done_channel};
use lectern_core::events::DoneBus;
use lectern_core::ports::{AudioCache, InFlightRegistry, JobQueue, ResultsStream, StoreError};

use crate::metrics::Metrics;

/// Pause after a store error before polling again.
const STORE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Long-running task draining worker results in receive order.
pub struct ResultConsumer {
    queue: Arc<dyn JobQueue>,
    results: Arc<dyn ResultsStream>,
    cache: Arc<dyn AudioCache>,
    inflight: Arc<dyn InFlightRegistry>,
    bus: Arc<DoneBus>,
    metrics: Arc<Metrics>,
}

impl ResultConsumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        results: Arc<dyn ResultsStream>,
        cache: Arc<dyn AudioCache>,
        inflight: Arc<dyn InFlightRegistry>,
        bus: Arc<DoneBus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { queue, results, cache, inflight, bus, metrics }
    }

    /// Drain until cancelled. `pop_result` is bounded-poll, so cancellation
    /// is observed within one poll interval.
    pub async fn run(self, cancel: CancellationToken) {
        info!("result consumer started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                popped = self.results.pop_result() => match popped {
                    Ok(Some(result)) => self.process(result).await,
                    Ok(None) => {}
                    Err(err) => {
                        warn!(error = %err, "results stream unavailable, backing off");
                        tokio::time::sleep(STORE_ERROR_BACKOFF).await;
                    }
                },
            }
        }
        info!("result consumer stopped");
    }

    /// Handle one result: cache, fan out, clear in-flight, count.
    pub async fn process(&self, result: WorkerResult) {
        if result.is_error() {
            self.process_error(&result).await;
            return;
        }

        // Sole-writer cache put. A failed put must NOT block the
        // subscribers — they get an error status instead of silence.
        let put_error = match &result.audio {
            Some(audio) => self
                .cache
                .put(
                    &result.variant_hash,
                    audio.clone(),
                    result.audio_duration_ms,
                    &result.model_id,
                    &result.voice_id,
                )
                .await
                .err(),
            // Constructors forbid this shape, but a foreign producer could
            // emit it; treat as an error result.
            None => {
                self.process_error(&result).await;
                return;
            }
        };

        let subscribers = self.inflight.subscribers(&result.variant_hash).await;
        debug!(
            variant_hash = %result.variant_hash,
            subscribers = subscribers.len(),
            worker_id = %result.worker_id,
            "worker result processed"
        );

        for subscriber in &subscribers {
            let message = match &put_error {
                None => StatusMessage::from_result(&result, subscriber.block_index, &subscriber.document_id),
                Some(err) => StatusMessage::error(
                    subscriber.document_id.clone(),
                    subscriber.block_index,
                    result.variant_hash.clone(),
                    result.model_id.clone(),
                    result.voice_id.clone(),
                    format!("cache write failed: {err}"),
                ),
            };
            self.bus.publish(
                &done_channel(&subscriber.user_id, &subscriber.document_id),
                message,
            );
        }

        // Always cleared, or a permanently warm variant would dedupe against
        // a record nobody will ever complete again.
        self.inflight.clear(&result.variant_hash).await;

        if put_error.is_some() {
            self.metrics.record_synthesis_error();
        } else {
            self.metrics.record_completion(result.processing_time_ms, result.audio_duration_ms);
        }
    }

    /// Error path.
    ///
    /// Retriable failures (transient worker errors, with the job envelope
    /// echoed on the result) go silently back on their queue while the
    /// retry budget lasts — subscribers keep waiting for the retry. Fatal
    /// failures and exhausted budgets park the job in the DLQ; only then do
    /// subscribers get their one `status=error`, and the in-flight record
    /// is cleared.
    async fn process_error(&self, result: &WorkerResult) {
        let reason = result.error.clone().unwrap_or_else(|| "synthesis failed".to_string());

        if let Some(job) = &result.job {
            if result.retriable {
                match self.queue.requeue(&job.model_id, job.clone()).await {
                    Ok(()) => {
                        debug!(
                            variant_hash = %result.variant_hash,
                            job_id = %job.job_id,
                            retry_count = job.retry_count + 1,
                            error = %reason,
                            "transient failure, job requeued"
                        );
                        self.metrics.record_requeue();
                        return;
                    }
                    Err(StoreError::RetriesExhausted { .. }) => {
                        // Budget spent: fall through to the terminal branch.
                    }
                    Err(err) => {
                        // Store trouble: do not strand the subscribers.
                        warn!(job_id = %job.job_id, error = %err, "requeue failed, reporting error");
                    }
                }
            }
            if let Err(err) = self.queue.dlq(&job.model_id, job.clone(), &reason).await {
                warn!(job_id = %job.job_id, error = %err, "DLQ write failed");
            } else {
                self.metrics.record_dlq();
            }
        }

        let subscribers = self.inflight.subscribers(&result.variant_hash).await;
        warn!(
            variant_hash = %result.variant_hash,
            subscribers = subscribers.len(),
            error = %reason,
            "synthesis error result"
        );

        for subscriber in &subscribers {
            let message = StatusMessage::error(
                subscriber.document_id.clone(),
                subscriber.block_index,
                result.variant_hash.clone(),
                result.model_id.clone(),
                result.voice_id.clone(),
                reason.clone(),
            );
            self.bus.publish(
                &done_channel(&subscriber.user_id, &subscriber.document_id),
                message,
            );
        }

        self.inflight.clear(&result.variant_hash).await;
        self.metrics.record_synthesis_error();
    }
}
