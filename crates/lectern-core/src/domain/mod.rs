//! Domain types: wire envelopes and coordinator records.

pub mod job;
pub mod result;
pub mod status;

pub use job::{DlqEntry, Subscriber, SynthesisJob};
pub use result::WorkerResult;
pub use status::{BlockStatus, StatusMessage, audio_url, done_channel};
