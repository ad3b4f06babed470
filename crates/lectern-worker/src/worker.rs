//! The generic pull-process-push loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lectern_core::domain::WorkerResult;
use lectern_core::ports::{JobQueue, ResultsStream};

use crate::error::SynthesisError;
use crate::synth::{SpeechRequest, Synthesizer};

/// Reconnect backoff bounds for store loss: 1s doubling to 60s, reset on
/// the first successful store call.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// One worker process's loop over one model queue.
///
/// The loop is everything a worker is: claim, synthesize, always push
/// exactly one result, clear the claim. No cache, no subscribers, no retry
/// decisions — those are coordinator concerns. Crashing anywhere mid-cycle
/// is safe: the claim goes stale and the visibility scanner requeues.
pub struct WorkerLoop {
    worker_id: String,
    model_id: String,
    queue: Arc<dyn JobQueue>,
    results: Arc<dyn ResultsStream>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl WorkerLoop {
    pub fn new(
        worker_id: impl Into<String>,
        model_id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        results: Arc<dyn ResultsStream>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            model_id: model_id.into(),
            queue,
            results,
            synthesizer,
        }
    }

    /// Pull and process until cancelled. Store loss is retried forever with
    /// exponential backoff; the worker never gives up on its queue.
    pub async fn run(self, cancel: CancellationToken) {
        info!(worker_id = %self.worker_id, model_id = %self.model_id, "worker loop started");
        let mut backoff = BACKOFF_BASE;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let claimed = tokio::select! {
                () = cancel.cancelled() => break,
                popped = self.queue.pop_and_claim(&self.model_id, &self.worker_id) => popped,
            };

            match claimed {
                Ok(Some(claimed)) => {
                    backoff = BACKOFF_BASE;
                    self.process(claimed.job, &cancel).await;
                }
                // Bounded poll elapsed with an empty queue.
                Ok(None) => {
                    backoff = BACKOFF_BASE;
                }
                Err(err) => {
                    warn!(
                        worker_id = %self.worker_id,
                        error = %err,
                        backoff_s = backoff.as_secs(),
                        "store unavailable, backing off"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
        info!(worker_id = %self.worker_id, "worker loop stopped");
    }

    /// One claim: synthesize, push the result, complete.
    async fn process(&self, job: lectern_core::domain::SynthesisJob, cancel: &CancellationToken) {
        let started = Instant::now();
        let request = SpeechRequest::from(&job);

        let result = match self.synthesizer.synthesize(&request).await {
            Ok(speech) => {
                debug!(
                    worker_id = %self.worker_id,
                    job_id = %job.job_id,
                    variant_hash = %job.variant_hash,
                    duration_ms = speech.duration_ms,
                    processing_ms = started.elapsed().as_millis() as u64,
                    "synthesis complete"
                );
                WorkerResult::success(
                    &job,
                    &self.worker_id,
                    speech.audio,
                    speech.duration_ms,
                    started.elapsed().as_millis() as u64,
                )
            }
            Err(SynthesisError::Transient(reason)) => {
                warn!(job_id = %job.job_id, reason = %reason, "transient synthesis failure");
                WorkerResult::transient(&job, &self.worker_id, reason, started.elapsed().as_millis() as u64)
            }
            Err(SynthesisError::Fatal(reason)) => {
                warn!(job_id = %job.job_id, reason = %reason, "fatal synthesis failure");
                WorkerResult::fatal(&job, &self.worker_id, reason, started.elapsed().as_millis() as u64)
            }
        };

        // The result MUST reach the stream — it is the only signal
        // subscribers will ever get. Retry the push through store trouble
        // (idempotence upstream makes a duplicate harmless if we crash
        // in between).
        let mut backoff = BACKOFF_BASE;
        loop {
            match self.results.push_result(result.clone()).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(job_id = %job.job_id, error = %err, "result push failed, retrying");
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }

        if let Err(err) = self.queue.complete(&self.model_id, job.job_id).await {
            // Claim will go stale and the scanner will requeue; the
            // duplicate completion is absorbed by the content address.
            warn!(job_id = %job.job_id, error = %err, "claim completion failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use lectern_core::domain::SynthesisJob;
    use lectern_core::variant::VariantHash;
    use lectern_store::MemoryBackend;

    use super::*;
    use crate::synth::{SpeechAudio, TestToneSynthesizer};

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

    fn worker(backend: &Arc<MemoryBackend>, synthesizer: Arc<dyn Synthesizer>) -> WorkerLoop {
        WorkerLoop::new(
            "w-test",
            "m1",
            Arc::clone(backend) as Arc<dyn JobQueue>,
            Arc::clone(backend) as Arc<dyn ResultsStream>,
            synthesizer,
        )
    }

    /// Backend that fails transiently a fixed number of times.
    struct FlakySynthesizer {
        failures: std::sync::Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl Synthesizer for FlakySynthesizer {
        async fn synthesize(
            &self,
            _request: &SpeechRequest,
        ) -> Result<SpeechAudio, SynthesisError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SynthesisError::Transient("model warming up".to_string()));
            }
            Ok(SpeechAudio { audio: bytes::Bytes::from_static(b"ok"), duration_ms: 10 })
        }

        async fn health(&self) -> Result<(), SynthesisError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn claim_synthesize_push_complete() {
        let backend = Arc::new(MemoryBackend::new(Duration::from_millis(10), 3));
        let j = job("hello there");
        backend.push("m1", j.clone()).await.unwrap();

        let w = worker(&backend, Arc::new(TestToneSynthesizer::new()));
        let claimed = backend.pop_and_claim("m1", "w-test").await.unwrap().unwrap();
        w.process(claimed.job, &CancellationToken::new()).await;

        let result = backend.pop_result().await.unwrap().unwrap();
        assert_eq!(result.job_id, j.job_id);
        assert!(!result.is_error());
        assert!(result.audio.as_ref().unwrap().len() > 0);
        assert!(result.audio_duration_ms > 0);
        assert_eq!(result.worker_id, "w-test");
        // Claim cleared: nothing is stale afterwards.
        assert!(backend.scan_stale("m1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_pushes_retriable_result_and_completes() {
        let backend = Arc::new(MemoryBackend::new(Duration::from_millis(10), 3));
        let j = job("will fail");
        backend.push("m1", j.clone()).await.unwrap();

        let w = worker(
            &backend,
            Arc::new(FlakySynthesizer { failures: std::sync::Mutex::new(1) }),
        );
        let claimed = backend.pop_and_claim("m1", "w-test").await.unwrap().unwrap();
        w.process(claimed.job, &CancellationToken::new()).await;

        let result = backend.pop_result().await.unwrap().unwrap();
        assert!(result.is_error());
        assert!(result.retriable);
        assert_eq!(result.job.as_ref().unwrap().job_id, j.job_id);
        assert!(backend.scan_stale("m1", 0).await.unwrap().is_empty(), "claim completed");
    }

    #[tokio::test]
    async fn fatal_failure_is_tagged_non_retriable() {
        let backend = Arc::new(MemoryBackend::new(Duration::from_millis(10), 3));
        let j = job("   "); // tone backend treats blank text as fatal
        backend.push("m1", j).await.unwrap();

        let w = worker(&backend, Arc::new(TestToneSynthesizer::new()));
        let claimed = backend.pop_and_claim("m1", "w-test").await.unwrap().unwrap();
        w.process(claimed.job, &CancellationToken::new()).await;

        let result = backend.pop_result().await.unwrap().unwrap();
        assert!(result.is_error());
        assert!(!result.retriable);
    }

    #[tokio::test]
    async fn run_drains_queue_until_cancelled() {
        let backend = Arc::new(MemoryBackend::new(Duration::from_millis(10), 3));
        backend.push("m1", job("one")).await.unwrap();
        backend.push("m1", job("two")).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            worker(&backend, Arc::new(TestToneSynthesizer::new())).run(cancel.clone()),
        );

        // pop_result is bounded-poll: keep polling under one deadline.
        let next = |backend: Arc<MemoryBackend>| async move {
            loop {
                if let Some(result) = backend.pop_result().await.unwrap() {
                    return result;
                }
            }
        };
        let first = tokio::time::timeout(Duration::from_secs(5), next(Arc::clone(&backend)))
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), next(Arc::clone(&backend)))
            .await
            .unwrap();
        assert_ne!(first.job_id, second.job_id);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
