use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ChatMessage, PresenceRecord};

/// Closed set of payload kinds exchanged over a direct channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireMessage {
    Message(ChatMessage),
    /// Sender's current profile card, pushed on channel open and after edits.
    Profile(PresenceRecord),
}

/// Envelope put on the wire: the sender's endpoint name plus the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub from: String,
    pub message: WireMessage,
}

impl Frame {
    pub fn new(from: impl Into<String>, message: WireMessage) -> Self {
        Self {
            from: from.into(),
            message,
        }
    }

    pub fn to_value(&self) -> Value {
        // Frame only holds strings and timestamps; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decodes a raw payload received from a driver. Unknown shapes are rejected.
    pub fn decode(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Reply to an inbound frame on the libp2p request-response protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_tagged_message_frame() {
        let raw = json!({
            "from": "concord-bruno",
            "message": {
                "type": "message",
                "payload": {
                    "id": "msg_1",
                    "senderId": "usr_b",
                    "senderName": "Bruno",
                    "targetId": "usr_a",
                    "text": "oi",
                    "timestamp": "2026-01-01T10:00:00Z"
                }
            }
        });
        let frame = Frame::decode(raw).unwrap();
        assert_eq!(frame.from, "concord-bruno");
        match frame.message {
            WireMessage::Message(msg) => assert_eq!(msg.text, "oi"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_payload_kind() {
        let raw = json!({
            "from": "concord-bruno",
            "message": { "type": "story", "payload": { "imageUrl": "x" } }
        });
        assert!(Frame::decode(raw).is_err());
    }

    #[test]
    fn rejects_untagged_payload() {
        let raw = json!({ "text": "oi" });
        assert!(Frame::decode(raw).is_err());
    }
}
