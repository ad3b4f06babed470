//! Serverless offload client port.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::SynthesisJob;

/// Status of one offloaded job, polled non-blockingly each scan cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerlessPoll {
    /// Still running; leave the outstanding entry for the next cycle.
    Pending,
    /// Finished; the scanner turns this into a [`crate::WorkerResult`].
    Completed { audio: Bytes, audio_duration_ms: u64 },
    /// The endpoint reported failure. Counts as a retry attempt.
    Failed { reason: String },
}

/// Errors from the offload transport itself (as opposed to a job that the
/// endpoint accepted and then failed — that is [`ServerlessPoll::Failed`]).
#[derive(Debug, Error)]
pub enum ServerlessError {
    #[error("serverless request failed: {0}")]
    Transport(String),

    #[error("serverless endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("serverless response missing field: {0}")]
    Malformed(&'static str),
}

/// Fire-and-poll client for the serverless synthesis endpoint.
///
/// Submission must return as soon as the endpoint accepts the job; the
/// scanner never blocks a task for the duration of a serverless synthesis.
#[async_trait]
pub trait ServerlessClient: Send + Sync {
    /// Submit a job; returns the endpoint's id for polling.
    async fn submit(&self, job: &SynthesisJob) -> Result<String, ServerlessError>;

    /// Poll one outstanding submission.
    async fn poll(&self, remote_id: &str) -> Result<ServerlessPoll, ServerlessError>;
}
