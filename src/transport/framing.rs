//! Raw and typed message framing.
//!
//! Raw framing: every binary message is exactly one chunk's bytes.
//!
//! Typed framing: every message is a UTF-8 JSON object
//! `{"type": string, "payload": string | object}`. Audio travels as
//! `{"type": "audio", "payload": "<base64 of the chunk bytes>"}`; any other
//! type is a control message for the application.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::WireMessage;
use crate::error::{MalformedMessage, TransportError};

/// Message type tag for audio in typed framing.
pub const AUDIO_MESSAGE_TYPE: &str = "audio";

/// Control type used for text frames received under raw framing.
pub const RAW_TEXT_TYPE: &str = "text";

/// How chunks are laid out on a message transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One binary message per chunk.
    #[default]
    Raw,
    /// JSON envelopes with base64 audio.
    Typed,
}

/// The typed-framing envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedMessage {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl TypedMessage {
    /// Serializes to a text message.
    pub fn to_wire(&self) -> Result<WireMessage, TransportError> {
        serde_json::to_string(self)
            .map(WireMessage::Text)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Raw chunk bytes, not yet validated against a format.
    Audio(Vec<u8>),
    /// A non-audio message for the control handler.
    Control {
        /// Message type tag.
        kind: String,
        /// Message payload.
        payload: Value,
    },
}

impl Framing {
    /// Wraps chunk bytes for sending.
    pub fn encode_audio(self, bytes: Vec<u8>) -> Result<WireMessage, TransportError> {
        match self {
            Self::Raw => Ok(WireMessage::Binary(bytes)),
            Self::Typed => TypedMessage {
                kind: AUDIO_MESSAGE_TYPE.to_string(),
                payload: Value::String(BASE64.encode(bytes)),
            }
            .to_wire(),
        }
    }

    /// Classifies an inbound message.
    pub fn decode(self, message: WireMessage) -> Result<Inbound, MalformedMessage> {
        match (self, message) {
            (Self::Raw, WireMessage::Binary(bytes)) => Ok(Inbound::Audio(bytes)),
            (Self::Raw, WireMessage::Text(text)) => Ok(Inbound::Control {
                kind: RAW_TEXT_TYPE.to_string(),
                payload: Value::String(text),
            }),
            (Self::Typed, WireMessage::Binary(_)) => Err(MalformedMessage::UnexpectedBinary),
            (Self::Typed, WireMessage::Text(text)) => decode_typed(&text),
        }
    }
}

fn decode_typed(text: &str) -> Result<Inbound, MalformedMessage> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| MalformedMessage::NotJson(e.to_string()))?;

    let Value::Object(mut object) = value else {
        return Err(MalformedMessage::MissingType);
    };
    let kind = match object.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(MalformedMessage::MissingType),
    };
    let payload = object.remove("payload").unwrap_or(Value::Null);

    if kind == AUDIO_MESSAGE_TYPE {
        let Value::String(encoded) = payload else {
            return Err(MalformedMessage::AudioPayloadNotString);
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| MalformedMessage::InvalidBase64(e.to_string()))?;
        return Ok(Inbound::Audio(bytes));
    }

    Ok(Inbound::Control { kind, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_binary_is_audio() {
        let inbound = Framing::Raw
            .decode(WireMessage::Binary(vec![1, 2]))
            .unwrap();
        assert_eq!(inbound, Inbound::Audio(vec![1, 2]));
    }

    #[test]
    fn test_raw_text_is_control() {
        let inbound = Framing::Raw
            .decode(WireMessage::Text("ping".into()))
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Control {
                kind: "text".into(),
                payload: json!("ping")
            }
        );
    }

    #[test]
    fn test_typed_audio_encoding() {
        let msg = Framing::Typed.encode_audio(vec![0, 1, 2, 3]).unwrap();
        let WireMessage::Text(text) = msg else {
            panic!("typed audio must be text");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "audio", "payload": "AAECAw=="}));

        let inbound = Framing::Typed.decode(WireMessage::Text(text)).unwrap();
        assert_eq!(inbound, Inbound::Audio(vec![0, 1, 2, 3]));
    }

    #[test]
    fn test_typed_control_object_payload() {
        let text = json!({"type": "transcript", "payload": {"text": "hi", "final": true}});
        let inbound = Framing::Typed
            .decode(WireMessage::Text(text.to_string()))
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Control {
                kind: "transcript".into(),
                payload: json!({"text": "hi", "final": true})
            }
        );
    }

    #[test]
    fn test_typed_control_without_payload() {
        let inbound = Framing::Typed
            .decode(WireMessage::Text(r#"{"type":"end"}"#.into()))
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Control {
                kind: "end".into(),
                payload: Value::Null
            }
        );
    }

    #[test]
    fn test_typed_malformed() {
        let decode = |s: &str| Framing::Typed.decode(WireMessage::Text(s.into()));

        assert!(matches!(decode("not json"), Err(MalformedMessage::NotJson(_))));
        assert_eq!(decode(r#"{"payload":"x"}"#), Err(MalformedMessage::MissingType));
        assert_eq!(decode(r#"{"type":7}"#), Err(MalformedMessage::MissingType));
        assert_eq!(decode("[1,2]"), Err(MalformedMessage::MissingType));
        assert_eq!(
            decode(r#"{"type":"audio","payload":{"x":1}}"#),
            Err(MalformedMessage::AudioPayloadNotString)
        );
        assert!(matches!(
            decode(r#"{"type":"audio","payload":"!!!"}"#),
            Err(MalformedMessage::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_typed_rejects_binary() {
        assert_eq!(
            Framing::Typed.decode(WireMessage::Binary(vec![0])),
            Err(MalformedMessage::UnexpectedBinary)
        );
    }
}
