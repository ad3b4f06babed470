//! Synthesis job envelope and its companion records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::variant::VariantHash;

/// A single unit of synthesis work as it travels queue → worker → results.
///
/// The envelope is self-describing: everything a worker or scanner needs is
/// carried on the job itself, so queue entries survive gateway restarts and
/// version skew. Wire evolution is additive only — new fields must be
/// optional with serde defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisJob {
    /// Unique per submission. Requeues keep the id; fresh requests for the
    /// same content get a fresh one.
    pub job_id: Uuid,
    /// Content address shared by every request for this rendition.
    pub variant_hash: VariantHash,
    /// Position of the block within its document (client-side ordering).
    pub block_index: u32,
    /// Document the block belongs to.
    pub document_id: String,
    /// User whose request created the job.
    pub user_id: String,
    /// Target model; selects the queue the job is pushed to.
    pub model_id: String,
    /// Target voice.
    pub voice_id: String,
    /// Voice tuning parameters (speed, pitch, ...). Key-sorted by
    /// construction so the variant hash is deterministic.
    #[serde(default)]
    pub voice_parameters: BTreeMap<String, f64>,
    /// The text to synthesize (already normalized).
    pub text: String,
    /// Opaque continuity state for voice-continuity adapters. Not part of
    /// the variant hash.
    #[serde(
        default,
        with = "crate::wire::base64_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub context_tokens: Option<bytes::Bytes>,
    /// Number of requeues so far. Monotonic; incremented only by `requeue`.
    #[serde(default)]
    pub retry_count: u32,
    /// When the job was (last) pushed to its queue. The overflow scanner
    /// ages jobs against this.
    pub enqueued_at: DateTime<Utc>,
}

impl SynthesisJob {
    /// Build a fresh job (retry count 0, enqueue timestamp now).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        variant_hash: VariantHash,
        block_index: u32,
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        model_id: impl Into<String>,
        voice_id: impl Into<String>,
        voice_parameters: BTreeMap<String, f64>,
        text: impl Into<String>,
        context_tokens: Option<bytes::Bytes>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            variant_hash,
            block_index,
            document_id: document_id.into(),
            user_id: user_id.into(),
            model_id: model_id.into(),
            voice_id: voice_id.into(),
            voice_parameters,
            text: text.into(),
            context_tokens,
            retry_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Age of the job since its (latest) enqueue.
    #[must_use]
    pub fn queue_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.enqueued_at
    }
}

/// A `(user, document, block)` tuple waiting on a variant's result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub user_id: String,
    pub document_id: String,
    pub block_index: u32,
}

impl Subscriber {
    pub fn new(
        user_id: impl Into<String>,
        document_id: impl Into<String>,
        block_index: u32,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            document_id: document_id.into(),
            block_index,
        }
    }
}

/// Terminal record for a job whose retry budget is exhausted.
///
/// DLQ entries are inspected by operators; nothing drains them
/// automatically, and a parked job never blocks fresh requests for the same
/// variant hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    pub job: SynthesisJob,
    /// Diagnostic, e.g. `"retries_exhausted"` or the final error.
    pub reason: String,
    /// Retry count reached when the job was parked.
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

impl DlqEntry {
    pub fn new(job: SynthesisJob, reason: impl Into<String>) -> Self {
        let retry_count = job.retry_count;
        Self {
            job,
            reason: reason.into(),
            retry_count,
            failed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> SynthesisJob {
        SynthesisJob::new(
            VariantHash::compute("hello", "m1", "v1", &BTreeMap::new()),
            3,
            "doc-a",
            "user-1",
            "m1",
            "v1",
            BTreeMap::new(),
            "hello",
            None,
        )
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let original = job();
        let json = serde_json::to_string(&original).unwrap();
        let back: SynthesisJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn missing_optional_fields_default() {
        // An envelope written by an older gateway: no retryCount, no
        // voiceParameters, no contextTokens. Must still parse.
        let json = serde_json::json!({
            "jobId": Uuid::new_v4(),
            "variantHash": "ab12",
            "blockIndex": 0,
            "documentId": "d",
            "userId": "u",
            "modelId": "m",
            "voiceId": "v",
            "text": "t",
            "enqueuedAt": Utc::now(),
        });
        let parsed: SynthesisJob = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.retry_count, 0);
        assert!(parsed.voice_parameters.is_empty());
        assert!(parsed.context_tokens.is_none());
    }

    #[test]
    fn dlq_entry_snapshots_retry_count() {
        let mut j = job();
        j.retry_count = 3;
        let entry = DlqEntry::new(j, "retries_exhausted");
        assert_eq!(entry.retry_count, 3);
        assert_eq!(entry.reason, "retries_exhausted");
    }
}
