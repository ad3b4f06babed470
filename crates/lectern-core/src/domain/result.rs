//! Worker result envelope.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::SynthesisJob;
use crate::variant::VariantHash;

/// What a worker (or the overflow scanner on a worker's behalf) pushes to
/// the results stream — success or error, but always exactly one per claim.
///
/// `audio` and `error` are mutually exclusive by contract; the constructors
/// below are the only sanctioned way to build one, so the exclusivity holds
/// everywhere the envelope is produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub job_id: Uuid,
    pub variant_hash: VariantHash,
    pub user_id: String,
    pub document_id: String,
    pub block_index: u32,
    pub model_id: String,
    pub voice_id: String,
    /// Rendered audio. `None` exactly when `error` is set.
    #[serde(
        default,
        with = "crate::wire::base64_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub audio: Option<Bytes>,
    /// Duration of the rendered audio; 0 on error.
    #[serde(default)]
    pub audio_duration_ms: u64,
    /// Who produced this result (worker id or the overflow scanner).
    pub worker_id: String,
    /// Wall time spent synthesizing (or waiting on serverless).
    #[serde(default)]
    pub processing_time_ms: u64,
    /// Retry count of the job at completion time, for completion envelopes
    /// and metrics.
    #[serde(default)]
    pub retry_count: u32,
    /// Failure description. `None` exactly when `audio` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the coordinator may spend a retry on this failure. Scanner
    /// synthetics and fatal job errors are not retriable.
    #[serde(default)]
    pub retriable: bool,
    /// The job envelope, echoed back on worker failures so the coordinator
    /// can requeue or park it without a queue lookup. Absent on success and
    /// on scanner synthetics (their queue bookkeeping already happened).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<SynthesisJob>,
}

impl WorkerResult {
    /// Successful synthesis.
    pub fn success(
        job: &SynthesisJob,
        worker_id: impl Into<String>,
        audio: Bytes,
        audio_duration_ms: u64,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            job_id: job.job_id,
            variant_hash: job.variant_hash.clone(),
            user_id: job.user_id.clone(),
            document_id: job.document_id.clone(),
            block_index: job.block_index,
            model_id: job.model_id.clone(),
            voice_id: job.voice_id.clone(),
            audio: Some(audio),
            audio_duration_ms,
            worker_id: worker_id.into(),
            processing_time_ms,
            retry_count: job.retry_count,
            error: None,
            retriable: false,
            job: None,
        }
    }

    /// Terminal failure with no queue side effects left to take. Used by
    /// the scanners for synthetic results (retries exhausted, serverless
    /// failure after DLQ), so subscribers always hear back.
    pub fn failure(
        job: &SynthesisJob,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self::error_result(job, worker_id, error, processing_time_ms, false, None)
    }

    /// Transient worker failure: the coordinator may spend a retry. The
    /// envelope rides along so the requeue needs no queue lookup.
    pub fn transient(
        job: &SynthesisJob,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self::error_result(job, worker_id, error, processing_time_ms, true, Some(job.clone()))
    }

    /// Fatal job failure (malformed input, incompatible voice): park in the
    /// DLQ immediately, no retry.
    pub fn fatal(
        job: &SynthesisJob,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self::error_result(job, worker_id, error, processing_time_ms, false, Some(job.clone()))
    }

    fn error_result(
        job: &SynthesisJob,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        processing_time_ms: u64,
        retriable: bool,
        envelope: Option<SynthesisJob>,
    ) -> Self {
        Self {
            job_id: job.job_id,
            variant_hash: job.variant_hash.clone(),
            user_id: job.user_id.clone(),
            document_id: job.document_id.clone(),
            block_index: job.block_index,
            model_id: job.model_id.clone(),
            voice_id: job.voice_id.clone(),
            audio: None,
            audio_duration_ms: 0,
            worker_id: worker_id.into(),
            processing_time_ms,
            retry_count: job.retry_count,
            error: Some(error.into()),
            retriable,
            job: envelope,
        }
    }

    /// Whether this is the error variant.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn job() -> SynthesisJob {
        SynthesisJob::new(
            VariantHash::compute("t", "m", "v", &BTreeMap::new()),
            0,
            "doc",
            "user",
            "m",
            "v",
            BTreeMap::new(),
            "t",
            None,
        )
    }

    #[test]
    fn constructors_enforce_audio_error_exclusivity() {
        let ok = WorkerResult::success(&job(), "w1", Bytes::from_static(b"pcm"), 1200, 80);
        assert!(!ok.is_error());
        assert!(ok.audio.is_some() && ok.error.is_none());

        let err = WorkerResult::failure(&job(), "w1", "voice not found", 5);
        assert!(err.is_error());
        assert!(err.audio.is_none() && err.error.is_some());
        assert_eq!(err.audio_duration_ms, 0);
    }

    #[test]
    fn error_constructors_set_retry_semantics() {
        let j = job();
        let synthetic = WorkerResult::failure(&j, "scanner", "retries_exhausted", 0);
        assert!(!synthetic.retriable);
        assert!(synthetic.job.is_none());

        let transient = WorkerResult::transient(&j, "w1", "model server hiccup", 10);
        assert!(transient.retriable);
        assert_eq!(transient.job.as_ref().unwrap().job_id, j.job_id);

        let fatal = WorkerResult::fatal(&j, "w1", "unknown voice", 10);
        assert!(!fatal.retriable);
        assert!(fatal.job.is_some());
    }

    #[test]
    fn result_round_trips_through_json() {
        let original = WorkerResult::success(&job(), "w1", Bytes::from_static(b"\x01\x02"), 99, 3);
        let json = serde_json::to_string(&original).unwrap();
        let back: WorkerResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
