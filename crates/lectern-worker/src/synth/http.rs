//! Model-server backend: synthesis over HTTP.
//!
//! For GPU boxes that run their own inference server process, the worker
//! delegates: `POST {base_url}/synthesize` with the request fields, audio
//! bytes come back in the body and the duration in the
//! `x-audio-duration-ms` header. `GET {base_url}/health` is the probe.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use tracing::debug;

use crate::error::SynthesisError;
use crate::synth::{SpeechAudio, SpeechRequest, Synthesizer};

/// Duration header set by the model server.
const DURATION_HEADER: &str = "x-audio-duration-ms";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeBody<'a> {
    text: &'a str,
    voice_id: &'a str,
    voice_parameters: &'a BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_tokens_b64: Option<String>,
}

/// HTTP-delegating [`Synthesizer`].
pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSynthesizer {
    /// Build a backend for a model server at `base_url`, with a per-request
    /// timeout covering the full synthesis round trip.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SynthesisError::Fatal(format!("http client: {e}")))?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, SynthesisError> {
        let body = SynthesizeBody {
            text: &request.text,
            voice_id: &request.voice_id,
            voice_parameters: &request.voice_parameters,
            context_tokens_b64: request.context_tokens.as_ref().map(|t| BASE64.encode(t)),
        };

        let response = self
            .client
            .post(format!("{}/synthesize", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Transient(format!("model server: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            // 4xx: our input is the problem; retrying the same text at the
            // same server cannot succeed.
            let text = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Fatal(format!("model server {status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Transient(format!("model server {status}: {text}")));
        }

        let duration_ms = response
            .headers()
            .get(DURATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Transient(format!("model server body: {e}")))?;

        debug!(bytes = audio.len(), duration_ms, "model server rendered audio");
        Ok(SpeechAudio { audio, duration_ms })
    }

    async fn health(&self) -> Result<(), SynthesisError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| SynthesisError::Transient(format!("model server: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SynthesisError::Transient(format!("model server health: {}", response.status())))
        }
    }
}
