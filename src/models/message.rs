use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation_key::ConversationKey;

/// Delivery status of a message. Only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "read" => MessageStatus::Read,
            "delivered" => MessageStatus::Delivered,
            _ => MessageStatus::Sent,
        }
    }
}

/// A message as accepted from a sender, before the store assigns identity
/// and a timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

/// A persisted message. Content is immutable once created; `status` is the
/// only field the delivery/read subsystem mutates afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// Per-conversation listing entry, most recent activity first.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_key: ConversationKey,
    pub last_message: MessageRecord,
    pub unread_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering_is_monotonic() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Read);
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ] {
            assert_eq!(MessageStatus::from_str(status.as_str()), status);
        }
    }
}
