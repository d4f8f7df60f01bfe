//! Inbound client events. Conversation keys arrive as raw strings so a bad
//! key surfaces as a typed error event instead of a frame-level parse
//! failure.

use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    #[serde(rename = "join")]
    Join { conversation_key: String },

    #[serde(rename = "send-message")]
    SendMessage {
        conversation_key: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        image_url: Option<String>,
    },

    #[serde(rename = "typing")]
    Typing {
        conversation_key: String,
        is_typing: bool,
    },

    #[serde(rename = "mark-read")]
    MarkRead {
        conversation_key: String,
        message_ids: Vec<Uuid>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_parses_with_only_text() {
        let evt: WsInboundEvent = serde_json::from_str(
            r#"{"type":"send-message","conversation_key":"k","text":"hello"}"#,
        )
        .unwrap();
        match evt {
            WsInboundEvent::SendMessage { text, image_url, .. } => {
                assert_eq!(text.as_deref(), Some("hello"));
                assert!(image_url.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn typing_parses_flag() {
        let evt: WsInboundEvent = serde_json::from_str(
            r#"{"type":"typing","conversation_key":"k","is_typing":true}"#,
        )
        .unwrap();
        assert!(matches!(evt, WsInboundEvent::Typing { is_typing: true, .. }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<WsInboundEvent>(r#"{"type":"nope"}"#).is_err());
    }
}
