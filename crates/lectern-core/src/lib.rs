#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]
#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod events;
pub mod ports;
pub mod settings;
pub mod variant;
pub mod wire;

// Re-export commonly used types for convenience
pub use domain::{
    BlockStatus, DlqEntry, StatusMessage, Subscriber, SynthesisJob, WorkerResult, audio_url,
    done_channel,
};
pub use events::DoneBus;
pub use ports::{
    AudioCache, CacheEntry, CacheStats, ClaimedJob, InFlightRegistry, JobQueue, ResultsStream,
    ServerlessClient, ServerlessError, ServerlessPoll, StoreError, OVERFLOW_OWNER,
};
pub use settings::{Settings, SettingsError, validate_settings};
pub use variant::{VariantHash, normalize_text};

// Silence unused dev-dependency warnings until doc-test-only helpers exist
#[cfg(test)]
use tokio_test as _;
