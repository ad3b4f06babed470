//! Deterministic tone backend for development and tests.

use std::f32::consts::TAU;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SynthesisError;
use crate::synth::{SpeechAudio, SpeechRequest, Synthesizer};

/// Output sample rate (matches the production models' 24 kHz).
pub const TONE_SAMPLE_RATE: u32 = 24_000;

/// Reading speed used to derive a plausible duration from the text.
const DEFAULT_WORDS_PER_MINUTE: f64 = 160.0;

/// Renders every request as a sine tone whose duration tracks the word
/// count, so timing-sensitive behavior (prefetch, cache hit ratios,
/// duration metrics) is exercised end to end without a model.
///
/// Deterministic on purpose: the same request yields byte-identical audio,
/// which keeps the content-address contract honest in tests.
#[derive(Debug, Clone, Default)]
pub struct TestToneSynthesizer;

impl TestToneSynthesizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Tone frequency for a voice: stable per voice id, distinct across
    /// voices so voice-switch tests can tell renditions apart.
    fn frequency(voice_id: &str) -> f32 {
        let seed = voice_id.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        220.0 + (seed % 440) as f32
    }
}

#[async_trait]
impl Synthesizer for TestToneSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, SynthesisError> {
        if request.text.trim().is_empty() {
            return Err(SynthesisError::Fatal("empty text".to_string()));
        }

        let words = request.text.split_whitespace().count().max(1) as f64;
        let speed = request.voice_parameters.get("speed").copied().unwrap_or(1.0);
        if speed <= 0.0 || !speed.is_finite() {
            return Err(SynthesisError::Fatal(format!("invalid speed {speed}")));
        }

        let duration_ms = (words * 60_000.0 / (DEFAULT_WORDS_PER_MINUTE * speed)) as u64;
        let sample_count = (duration_ms * u64::from(TONE_SAMPLE_RATE) / 1000) as usize;
        let frequency = Self::frequency(&request.voice_id);

        let mut pcm = Vec::with_capacity(sample_count * 2);
        for n in 0..sample_count {
            let t = n as f32 / TONE_SAMPLE_RATE as f32;
            let sample = ((TAU * frequency * t).sin() * 0.2 * f32::from(i16::MAX)) as i16;
            pcm.extend_from_slice(&sample.to_le_bytes());
        }

        Ok(SpeechAudio { audio: Bytes::from(pcm), duration_ms })
    }

    async fn health(&self) -> Result<(), SynthesisError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn request(text: &str, voice: &str) -> SpeechRequest {
        SpeechRequest {
            text: text.to_string(),
            voice_id: voice.to_string(),
            voice_parameters: BTreeMap::new(),
            context_tokens: None,
        }
    }

    #[tokio::test]
    async fn output_is_deterministic() {
        let synth = TestToneSynthesizer::new();
        let a = synth.synthesize(&request("hello world", "v1")).await.unwrap();
        let b = synth.synthesize(&request("hello world", "v1")).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn duration_tracks_word_count() {
        let synth = TestToneSynthesizer::new();
        let short = synth.synthesize(&request("one", "v1")).await.unwrap();
        let long = synth.synthesize(&request("one two three four five six", "v1")).await.unwrap();
        assert!(long.duration_ms > short.duration_ms);
        // PCM16: two bytes per sample.
        assert_eq!(long.audio.len() % 2, 0);
    }

    #[tokio::test]
    async fn voices_render_differently() {
        let synth = TestToneSynthesizer::new();
        let v1 = synth.synthesize(&request("same text", "voice-a")).await.unwrap();
        let v2 = synth.synthesize(&request("same text", "voice-b")).await.unwrap();
        assert_ne!(v1.audio, v2.audio);
    }

    #[tokio::test]
    async fn empty_text_is_fatal() {
        let synth = TestToneSynthesizer::new();
        let err = synth.synthesize(&request("   ", "v1")).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn speed_parameter_shortens_audio() {
        let synth = TestToneSynthesizer::new();
        let mut fast = request("a few words here", "v1");
        fast.voice_parameters.insert("speed".to_string(), 2.0);
        let normal = synth.synthesize(&request("a few words here", "v1")).await.unwrap();
        let doubled = synth.synthesize(&fast).await.unwrap();
        assert!(doubled.duration_ms < normal.duration_ms);
    }
}
