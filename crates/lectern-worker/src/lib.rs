#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]
#![deny(unused_crate_dependencies)]

pub mod error;
pub mod synth;
pub mod worker;

pub use error::SynthesisError;
pub use synth::{
    HttpSynthesizer, SpeechAudio, SpeechRequest, Synthesizer, TestToneSynthesizer,
};
pub use worker::WorkerLoop;

// Silence unused dev-dependency warnings
#[cfg(test)]
use tokio_test as _;
