//! Wire envelopes for the live connection.
//!
//! Both directions are JSON objects tagged by a `type` field. The set of
//! types is closed: anything that does not deserialize into one of these
//! variants is a protocol violation.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, UserId};
use crate::messages::PersistedMessage;

/// Server -> client push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    NewMessage {
        message: PersistedMessage,
    },
    Typing {
        from: UserId,
    },
    Seen {
        from: UserId,
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
}

impl OutboundEvent {
    /// The `type` tag, for logs and metric labels.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::Typing { .. } => "typing",
            Self::Seen { .. } => "seen",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Client -> server message.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake carrying a bearer credential.
    Register {
        #[serde(alias = "credential")]
        token: String,
    },
    Typing {
        to: UserId,
    },
    Seen {
        to: UserId,
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
}

impl ClientMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
