//! Content addressing for synthesis requests.
//!
//! A [`VariantHash`] is the fingerprint of a rendition:
//! `SHA-256(normalized_text, model_id, voice_id, voice_parameters)`.
//! It is the cache key, the queue-payload identity, and the pubsub
//! correlation id — two requests with the same fingerprint are guaranteed to
//! share one synthesis and one artifact.
//!
//! Context tokens (voice-continuity state for adapters that support it) are
//! deliberately NOT part of the fingerprint: they ride on the job envelope,
//! so per-session neighbor context never splinters the content address.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lowercase-hex SHA-256 content address of a synthesis request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantHash(String);

impl VariantHash {
    /// Compute the fingerprint of `(text, model, voice, parameters)`.
    ///
    /// Parameters are fed to the hasher in key order (`BTreeMap` iteration),
    /// so callers never have to worry about map ordering. Field boundaries
    /// are NUL-separated to keep the encoding unambiguous.
    pub fn compute(
        text: &str,
        model_id: &str,
        voice_id: &str,
        voice_parameters: &BTreeMap<String, f64>,
    ) -> Self {
        let normalized = normalize_text(text);

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0u8]);
        hasher.update(model_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(voice_id.as_bytes());
        for (key, value) in voice_parameters {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            // to_bits: bit-identical floats hash identically, NaN included.
            hasher.update(value.to_bits().to_le_bytes());
        }

        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an already-computed hex digest (e.g. from a URL path segment).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The hex digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapse Unicode whitespace runs to single spaces and trim the ends.
///
/// This is the only text transformation that participates in the content
/// address. Anything stronger (case folding, punctuation stripping) would
/// change what the user hears, so it stays out.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = true; // leading whitespace is dropped
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_gap {
                out.push(' ');
                in_gap = true;
            }
        } else {
            out.push(ch);
            in_gap = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(normalize_text("  hello   world \n"), "hello world");
        assert_eq!(normalize_text("a\tb\u{a0}c"), "a b c");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn whitespace_variants_share_a_fingerprint() {
        let p = params(&[("speed", 1.0)]);
        let a = VariantHash::compute("hello  world", "m1", "v1", &p);
        let b = VariantHash::compute(" hello world\n", "m1", "v1", &p);
        assert_eq!(a, b);
    }

    #[test]
    fn model_voice_and_parameters_all_discriminate() {
        let p = params(&[("speed", 1.0)]);
        let base = VariantHash::compute("x", "m1", "v1", &p);
        assert_ne!(base, VariantHash::compute("x", "m2", "v1", &p));
        assert_ne!(base, VariantHash::compute("x", "m1", "v2", &p));
        assert_ne!(base, VariantHash::compute("x", "m1", "v1", &params(&[("speed", 1.5)])));
        assert_ne!(base, VariantHash::compute("y", "m1", "v1", &p));
    }

    #[test]
    fn parameter_order_is_irrelevant() {
        let a = params(&[("pitch", 0.5), ("speed", 1.0)]);
        let b = params(&[("speed", 1.0), ("pitch", 0.5)]);
        assert_eq!(
            VariantHash::compute("x", "m", "v", &a),
            VariantHash::compute("x", "m", "v", &b)
        );
    }

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        let h = VariantHash::compute("x", "m", "v", &BTreeMap::new());
        assert_eq!(h.as_str().len(), 64);
        assert!(h.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn serde_is_transparent() {
        let h = VariantHash::from_hex("abc123");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, "\"abc123\"");
        let back: VariantHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
