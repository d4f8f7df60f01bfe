//! Outbound server events. One enum, one serialization point; every event
//! carries its name in `type` and nothing is hand-assembled in handlers.

use axum::extract::ws::Message;
use serde::Serialize;
use uuid::Uuid;

use crate::conversation_key::ConversationKey;
use crate::error::AppError;
use crate::models::MessageRecord;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    /// Sent to the recipient's live connections only.
    #[serde(rename = "message-received")]
    MessageReceived { message: MessageRecord },

    /// Sent to the sender's own connection only; confirms durable storage.
    #[serde(rename = "message-sent-ack")]
    MessageSentAck { message: MessageRecord },

    /// Sent to the peer of the typist.
    #[serde(rename = "typing-changed")]
    TypingChanged {
        conversation_key: ConversationKey,
        user_id: Uuid,
        is_typing: bool,
    },

    /// Broadcast to both endpoints; carries only ids that transitioned.
    #[serde(rename = "messages-marked-read")]
    MessagesMarkedRead {
        conversation_key: ConversationKey,
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
    },

    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

impl WsOutboundEvent {
    pub fn from_error(err: &AppError) -> Self {
        WsOutboundEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            retry_after_secs: err.retry_after_secs(),
        }
    }

    pub fn to_ws_message(&self) -> Message {
        // The enum is Serialize over plain data; failure here would be a
        // programming error, so fall back to a minimal hand-built frame.
        let text = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize outbound event");
            r#"{"type":"error","code":"internal","message":"serialization failure"}"#.to_string()
        });
        Message::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_carries_retry_after_only_when_present() {
        let rate_limited = WsOutboundEvent::from_error(&AppError::RateLimited {
            retry_after_secs: 9,
        });
        let json = serde_json::to_value(&rate_limited).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "rate-limited");
        assert_eq!(json["retry_after_secs"], 9);

        let unauthorized = WsOutboundEvent::from_error(&AppError::Unauthorized);
        let json = serde_json::to_value(&unauthorized).unwrap();
        assert!(json.get("retry_after_secs").is_none());
    }

    #[test]
    fn typing_event_shape() {
        let key = ConversationKey::canonical(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let user_id = Uuid::new_v4();
        let event = WsOutboundEvent::TypingChanged {
            conversation_key: key,
            user_id,
            is_typing: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "typing-changed");
        assert_eq!(json["is_typing"], false);
        assert_eq!(json["conversation_key"], key.to_string());
    }
}
