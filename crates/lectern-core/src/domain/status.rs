//! Gateway → client status messages and pubsub channel naming.

use serde::{Deserialize, Serialize};

use crate::domain::WorkerResult;
use crate::variant::VariantHash;

/// Lifecycle state reported to the client for one block request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// A new job was pushed to the model queue for this request.
    Queued,
    /// An identical variant is already in flight; this request joined it.
    Processing,
    /// Audio is in the cache and ready to fetch.
    Cached,
    /// Synthesis failed terminally for this request.
    Error,
}

/// The single outbound message shape, both over the per-document pubsub
/// channel and directly on the WebSocket (cache hits, protocol errors).
///
/// Every message carries `model_id` and `voice_id` so clients can discard
/// stale messages after a voice switch instead of misattributing them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub document_id: String,
    pub block_index: u32,
    pub variant_hash: VariantHash,
    pub status: BlockStatus,
    pub model_id: String,
    pub voice_id: String,
    /// Where to fetch the audio; set exactly when `status == cached`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Failure description; set exactly when `status == error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusMessage {
    /// `cached` message pointing at the audio artifact.
    pub fn cached(
        document_id: impl Into<String>,
        block_index: u32,
        variant_hash: VariantHash,
        model_id: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        let url = audio_url(&variant_hash);
        Self {
            document_id: document_id.into(),
            block_index,
            variant_hash,
            status: BlockStatus::Cached,
            model_id: model_id.into(),
            voice_id: voice_id.into(),
            audio_url: Some(url),
            error: None,
        }
    }

    /// `error` message for a terminally failed request.
    pub fn error(
        document_id: impl Into<String>,
        block_index: u32,
        variant_hash: VariantHash,
        model_id: impl Into<String>,
        voice_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            block_index,
            variant_hash,
            status: BlockStatus::Error,
            model_id: model_id.into(),
            voice_id: voice_id.into(),
            audio_url: None,
            error: Some(error.into()),
        }
    }

    /// Done message for a processed worker result, addressed to one
    /// subscriber's block index.
    pub fn from_result(result: &WorkerResult, block_index: u32, document_id: &str) -> Self {
        match &result.error {
            None => Self::cached(
                document_id,
                block_index,
                result.variant_hash.clone(),
                result.model_id.clone(),
                result.voice_id.clone(),
            ),
            Some(err) => Self::error(
                document_id,
                block_index,
                result.variant_hash.clone(),
                result.model_id.clone(),
                result.voice_id.clone(),
                err.clone(),
            ),
        }
    }
}

/// Pubsub channel for one `(user, document)` pair.
///
/// Per-document (not per-user) scoping is load-bearing: a user with two tabs
/// on different documents must never have tab B act on tab A's results.
#[must_use]
pub fn done_channel(user_id: &str, document_id: &str) -> String {
    format!("done:{user_id}:{document_id}")
}

/// Gateway-relative URL under which a cached artifact is served.
#[must_use]
pub fn audio_url(variant_hash: &VariantHash) -> String {
    format!("/api/audio/{variant_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_message_carries_audio_url_and_tags() {
        let msg = StatusMessage::cached("doc", 2, VariantHash::from_hex("ff"), "m1", "v1");
        assert_eq!(msg.status, BlockStatus::Cached);
        assert_eq!(msg.audio_url.as_deref(), Some("/api/audio/ff"));
        assert_eq!(msg.model_id, "m1");
        assert_eq!(msg.voice_id, "v1");
        assert!(msg.error.is_none());
    }

    #[test]
    fn error_message_has_no_audio_url() {
        let msg =
            StatusMessage::error("doc", 2, VariantHash::from_hex("ff"), "m1", "v1", "boom");
        assert_eq!(msg.status, BlockStatus::Error);
        assert!(msg.audio_url.is_none());
        assert_eq!(msg.error.as_deref(), Some("boom"));
    }

    #[test]
    fn status_serializes_snake_case() {
        let msg = StatusMessage::cached("d", 0, VariantHash::from_hex("aa"), "m", "v");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["status"], "cached");
        assert_eq!(json["documentId"], "d");
    }

    #[test]
    fn channel_naming_is_per_user_per_document() {
        assert_eq!(done_channel("u1", "docA"), "done:u1:docA");
        assert_ne!(done_channel("u1", "docA"), done_channel("u1", "docB"));
        assert_ne!(done_channel("u1", "docA"), done_channel("u2", "docA"));
    }
}
