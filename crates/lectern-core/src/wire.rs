//! Serde helpers for wire envelopes.

/// Base64 (de)serialization for optional audio payloads.
///
/// JSON is the envelope format for queue entries and worker results; raw
/// byte arrays serialize as number lists there, which is both bloated and
/// slow. Audio therefore always travels as a base64 string. Use with
/// `#[serde(with = "lectern_core::wire::base64_bytes")]`.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(|raw| Some(Bytes::from(raw)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
