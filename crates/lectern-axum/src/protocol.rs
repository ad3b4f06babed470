//! Client → gateway WebSocket message shapes.
//!
//! Gateway → client traffic is the one [`StatusMessage`] shape defined in
//! `lectern-core`; this module only describes the inbound side. Both
//! directions evolve additively: new optional fields only, unknown fields
//! ignored.
//!
//! [`StatusMessage`]: lectern_core::domain::StatusMessage

use std::collections::BTreeMap;

use serde::Deserialize;

/// Inbound messages, tagged by `type`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request audio for one block of a document.
    #[serde(rename_all = "camelCase")]
    Synthesize {
        document_id: String,
        block_index: u32,
        text: String,
        model_id: String,
        voice_id: String,
        #[serde(default)]
        voice_parameters: BTreeMap<String, f64>,
        /// Opaque continuity state, base64 on the wire.
        #[serde(default)]
        context_tokens_b64: Option<String>,
    },

    /// The playback cursor moved; prune the prefetch bookkeeping.
    #[serde(rename_all = "camelCase")]
    CursorMoved { document_id: String, cursor_index: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_parses_with_and_without_optionals() {
        let minimal: ClientMessage = serde_json::from_str(
            r#"{"type":"synthesize","documentId":"d1","blockIndex":3,"text":"hello",
                "modelId":"m1","voiceId":"v1"}"#,
        )
        .unwrap();
        match minimal {
            ClientMessage::Synthesize { document_id, block_index, voice_parameters, .. } => {
                assert_eq!(document_id, "d1");
                assert_eq!(block_index, 3);
                assert!(voice_parameters.is_empty());
            }
            ClientMessage::CursorMoved { .. } => panic!("wrong variant"),
        }

        let full: ClientMessage = serde_json::from_str(
            r#"{"type":"synthesize","documentId":"d1","blockIndex":3,"text":"hello",
                "modelId":"m1","voiceId":"v1","voiceParameters":{"speed":1.25},
                "contextTokensB64":"AAEC"}"#,
        )
        .unwrap();
        match full {
            ClientMessage::Synthesize { voice_parameters, context_tokens_b64, .. } => {
                assert_eq!(voice_parameters["speed"], 1.25);
                assert_eq!(context_tokens_b64.as_deref(), Some("AAEC"));
            }
            ClientMessage::CursorMoved { .. } => panic!("wrong variant"),
        }
    }

    #[test]
    fn cursor_moved_parses() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"cursor_moved","documentId":"d1","cursorIndex":12}"#,
        )
        .unwrap();
        assert_eq!(msg, ClientMessage::CursorMoved {
            document_id: "d1".to_string(),
            cursor_index: 12
        });
    }

    #[test]
    fn unknown_type_is_an_error_not_a_panic() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#);
        assert!(result.is_err());
    }
}
