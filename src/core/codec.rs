//! Wire encoding for messages travelling through the broker
//!
//! Payloads carry the publishing session next to the message so the
//! outbound flow can recognise its own traffic. The origin never reaches
//! clients.

use serde::{Deserialize, Serialize};

use crate::core::message::Message;
use crate::core::session::SessionId;
use crate::error::{RelayError, Result};

/// A message as published on the broadcast medium
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Publishing session, absent for payloads not sent by a session
    #[serde(default)]
    pub origin: Option<SessionId>,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(origin: SessionId, message: Message) -> Self {
        Self {
            origin: Some(origin),
            message,
        }
    }
}

/// Encode an envelope into the bytes published on the broadcast medium
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|e| RelayError::Encode(e.to_string()))
}

/// Decode bytes consumed from a subscription
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(bytes).map_err(|e| RelayError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_restores_envelope() {
        let envelope = Envelope::new(SessionId(7), Message::new("A", "hello"));
        let bytes = encode(&envelope).unwrap();
        assert_eq!(decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_plain_message_has_no_origin() {
        let envelope = decode(br#"{"sender":"A","body":"hello"}"#).unwrap();
        assert_eq!(envelope.origin, None);
        assert_eq!(envelope.message.body, "hello");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"\xff\x00not json").unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_missing_body() {
        let err = decode(br#"{"sender":"A","origin":1}"#).unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }
}
