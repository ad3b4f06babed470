//! HTTP adapter for the serverless offload endpoint.
//!
//! Wire contract with the endpoint:
//!
//! - `POST {endpoint}` with the job envelope → `202`-ish JSON `{"id": "..."}`
//! - `GET {endpoint}/{id}` → `{"status": "pending" | "completed" | "failed",
//!   "audioB64": ..., "audioDurationMs": ..., "error": ...}`
//!
//! The HTTP timeout here covers one round trip, not the synthesis: the
//! scanner polls across cycles and applies the submission-to-completion
//! timeout itself.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use lectern_core::domain::SynthesisJob;
use lectern_core::ports::{ServerlessClient, ServerlessError, ServerlessPoll};

/// Per-round-trip HTTP timeout. Submission and polling are cheap control
/// calls; the synthesis itself runs behind the endpoint.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollResponse {
    status: String,
    #[serde(default)]
    audio_b64: Option<String>,
    #[serde(default)]
    audio_duration_ms: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// reqwest-backed [`ServerlessClient`].
pub struct HttpServerlessClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpServerlessClient {
    /// Build a client for `endpoint` (already validated by settings).
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ServerlessError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ServerlessError::Transport(e.to_string()))?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

#[async_trait]
impl ServerlessClient for HttpServerlessClient {
    async fn submit(&self, job: &SynthesisJob) -> Result<String, ServerlessError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(job)
            .send()
            .await
            .map_err(|e| ServerlessError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServerlessError::Endpoint { status: status.as_u16(), body });
        }

        let submit: SubmitResponse = response
            .json()
            .await
            .map_err(|_| ServerlessError::Malformed("id"))?;
        debug!(job_id = %job.job_id, remote_id = %submit.id, "serverless submission accepted");
        Ok(submit.id)
    }

    async fn poll(&self, remote_id: &str) -> Result<ServerlessPoll, ServerlessError> {
        let response = self
            .client
            .get(format!("{}/{remote_id}", self.endpoint))
            .send()
            .await
            .map_err(|e| ServerlessError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServerlessError::Endpoint { status: status.as_u16(), body });
        }

        let poll: PollResponse = response
            .json()
            .await
            .map_err(|_| ServerlessError::Malformed("status"))?;

        match poll.status.as_str() {
            "pending" | "running" => Ok(ServerlessPoll::Pending),
            "completed" => {
                let encoded = poll.audio_b64.ok_or(ServerlessError::Malformed("audioB64"))?;
                let audio = BASE64
                    .decode(encoded)
                    .map(Bytes::from)
                    .map_err(|_| ServerlessError::Malformed("audioB64"))?;
                Ok(ServerlessPoll::Completed {
                    audio,
                    audio_duration_ms: poll.audio_duration_ms.unwrap_or(0),
                })
            }
            "failed" => Ok(ServerlessPoll::Failed {
                reason: poll.error.unwrap_or_else(|| "serverless job failed".to_string()),
            }),
            other => Err(ServerlessError::Transport(format!("unknown status {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_response_parses_all_states() {
        let pending: PollResponse = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(pending.status, "pending");

        let done: PollResponse = serde_json::from_str(
            r#"{"status":"completed","audioB64":"cGNt","audioDurationMs":1500}"#,
        )
        .unwrap();
        assert_eq!(done.audio_duration_ms, Some(1500));
        assert_eq!(BASE64.decode(done.audio_b64.unwrap()).unwrap(), b"pcm");

        let failed: PollResponse =
            serde_json::from_str(r#"{"status":"failed","error":"oom"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("oom"));
    }
}
