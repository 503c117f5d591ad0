use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, UserId};

/// A direct message as recorded by the message store.
///
/// The body travels under the `message` key, matching what clients already
/// render for history and for `new_message` pushes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(rename = "message")]
    pub body: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedMessage {
        PersistedMessage {
            id: MessageId::new(1),
            sender_id: UserId::new(1),
            receiver_id: UserId::new(2),
            body: "hi".into(),
            created_at: "2026-01-01T00:00:00+00:00".into(),
        }
    }

    #[test]
    fn body_serializes_under_message_key() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["message"], "hi");
        assert_eq!(json["sender_id"], 1);
        assert_eq!(json["receiver_id"], 2);
        assert!(json.get("body").is_none());
    }
}
