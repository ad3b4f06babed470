//! Worker-side error types.

use thiserror::Error;

/// What a synthesizer backend can report.
///
/// The split decides retry policy at the coordinator: `Transient` spends a
/// retry, `Fatal` goes straight to the DLQ. Workers themselves never retry.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Worth retrying: network blip to a model server, transient adapter
    /// state, resource exhaustion expected to clear.
    #[error("transient synthesis failure: {0}")]
    Transient(String),

    /// Not worth retrying: malformed input, unknown voice, text the model
    /// cannot render.
    #[error("fatal synthesis failure: {0}")]
    Fatal(String),
}

impl SynthesisError {
    /// Whether the coordinator may spend a retry on this failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
