//! Synthesizer backend trait and implementations.
//!
//! The backplane treats synthesis as an opaque `text → audio bytes`
//! operation. A backend encapsulates all model-specific state (loaded
//! weights, phoneme caches, remote sessions) and is loaded lazily on first
//! use where loading is expensive.

pub mod http;
pub mod tone;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use lectern_core::domain::SynthesisJob;

use crate::error::SynthesisError;

pub use http::HttpSynthesizer;
pub use tone::TestToneSynthesizer;

/// Everything a backend may look at. Deliberately narrower than
/// [`SynthesisJob`]: no user, document, or queue bookkeeping reaches the
/// model layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: String,
    pub voice_parameters: BTreeMap<String, f64>,
    /// Continuity state for backends that condition on neighboring audio.
    pub context_tokens: Option<Bytes>,
}

impl From<&SynthesisJob> for SpeechRequest {
    fn from(job: &SynthesisJob) -> Self {
        Self {
            text: job.text.clone(),
            voice_id: job.voice_id.clone(),
            voice_parameters: job.voice_parameters.clone(),
            context_tokens: job.context_tokens.clone(),
        }
    }
}

/// Rendered speech.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub audio: Bytes,
    pub duration_ms: u64,
}

/// The per-worker synthesis capability.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render one request. One call at a time per worker process — the
    /// loop serializes, so implementations need no internal locking.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, SynthesisError>;

    /// Cheap readiness probe.
    async fn health(&self) -> Result<(), SynthesisError>;
}
