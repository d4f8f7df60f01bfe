//! End-to-end exercises of the composed engine over the in-memory
//! collaborators: the client/professional session, rate limiting of the
//! send pipeline, read receipts, and the offline notification backstop.

use std::sync::Arc;
use std::time::Duration;

use artisa_messaging::config::RateLimitSettings;
use artisa_messaging::conversation_key::ConversationKey;
use artisa_messaging::error::AppError;
use artisa_messaging::models::{MessageStatus, NotificationPreference, Participant, Role};
use artisa_messaging::presence::PresenceTracker;
use artisa_messaging::ratelimit::{MemoryCounterStore, RateLimiter};
use artisa_messaging::services::conversation_service::ConversationService;
use artisa_messaging::services::message_service::{MessageService, SendInput};
use artisa_messaging::services::notification_service::NotificationDispatcher;
use artisa_messaging::services::push::PushProvider;
use artisa_messaging::store::{
    MemoryDirectory, MemoryMessageStore, MemoryPreferenceStore, MessageStore, ParticipantDirectory,
    PreferenceStore,
};
use artisa_messaging::websocket::ConnectionRegistry;
use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Push provider that reports each send on a channel so tests can await the
/// detached dispatch task deterministically.
struct SignalingPush {
    sends: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl PushProvider for SignalingPush {
    async fn send(&self, device_token: String, _title: String, _body: String) -> Result<(), AppError> {
        let _ = self.sends.send(device_token);
        Ok(())
    }
}

struct Engine {
    registry: ConnectionRegistry,
    store: Arc<MemoryMessageStore>,
    directory: Arc<MemoryDirectory>,
    preferences: Arc<MemoryPreferenceStore>,
    conversations: ConversationService,
    messages: MessageService,
    presence: PresenceTracker,
    push_sends: mpsc::UnboundedReceiver<String>,
    client: Participant,
    professional: Participant,
}

fn engine(message_limit: u32) -> Engine {
    let store = Arc::new(MemoryMessageStore::new());
    let directory = Arc::new(MemoryDirectory::new());
    let preferences = Arc::new(MemoryPreferenceStore::new());
    let registry = ConnectionRegistry::new();

    let client = Participant {
        user_id: Uuid::new_v4(),
        display_name: "Carl Client".into(),
        role: Role::Client,
        email: Some("carl@example.com".into()),
    };
    let professional = Participant {
        user_id: Uuid::new_v4(),
        display_name: "Paula Pro".into(),
        role: Role::Professional,
        email: Some("paula@example.com".into()),
    };
    directory.insert(client.clone());
    directory.insert(professional.clone());

    let rate_limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        RateLimitSettings {
            message_per_window: message_limit,
            upload_per_window: 10,
            window: Duration::from_secs(60),
        },
    ));

    let (push_tx, push_sends) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        registry.clone(),
        directory.clone() as Arc<dyn ParticipantDirectory>,
        preferences.clone() as Arc<dyn PreferenceStore>,
        Some(Arc::new(SignalingPush { sends: push_tx })),
        None,
    ));

    let conversations = ConversationService::new(
        store.clone() as Arc<dyn MessageStore>,
        directory.clone() as Arc<dyn ParticipantDirectory>,
    );
    let messages = MessageService::new(
        store.clone() as Arc<dyn MessageStore>,
        directory.clone() as Arc<dyn ParticipantDirectory>,
        registry.clone(),
        rate_limiter,
        dispatcher,
        4096,
    );
    let presence = PresenceTracker::new(
        registry.clone(),
        store.clone() as Arc<dyn MessageStore>,
        Duration::from_secs(6),
    );

    Engine {
        registry,
        store,
        directory,
        preferences,
        conversations,
        messages,
        presence,
        push_sends,
        client,
        professional,
    }
}

fn text_frames(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            frames.push(serde_json::from_str(&text).unwrap());
        }
    }
    frames
}

fn send_input(key: ConversationKey, sender: Uuid, text: &str) -> SendInput {
    SendInput {
        conversation_key: key,
        sender_id: sender,
        text: Some(text.to_string()),
        image_url: None,
    }
}

#[tokio::test]
async fn client_professional_session_with_rate_limit_and_read_receipts() {
    let mut e = engine(5);
    let (client, pro) = (e.client.user_id, e.professional.user_id);

    // Open-or-create validates the pairing and yields the canonical key.
    let (key, last) = e.conversations.open_or_create(client, pro).await.unwrap();
    assert!(last.is_none());

    // The professional joins; the client keeps a connection too for
    // receipts.
    let mut pro_rx = e.registry.add_subscriber(key, pro).await;
    let mut client_rx = e.registry.add_subscriber(key, client).await;

    // Five sends succeed, each acked as delivered (peer is live).
    let mut sent_ids = Vec::new();
    for i in 0..5 {
        let record = e
            .messages
            .send(send_input(key, client, &format!("message {i}")))
            .await
            .unwrap();
        assert_eq!(record.status, MessageStatus::Delivered);
        sent_ids.push(record.id);
    }

    // The professional received all five, in send order.
    let frames = text_frames(&mut pro_rx);
    assert_eq!(frames.len(), 5);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame["type"], "message-received");
        assert_eq!(frame["message"]["text"], format!("message {i}"));
    }

    // The sixth send in the window is denied with a positive retry-after
    // and leaves no sixth message behind.
    let err = e
        .messages
        .send(send_input(key, client, "message 5"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RateLimited { retry_after_secs } if retry_after_secs > 0));
    let history = e.store.history(&key, 50, 0).await.unwrap();
    assert_eq!(history.len(), 5);

    // Read receipts: the professional marks everything read; the client's
    // connection sees the receipt with all five ids.
    let transitioned = e.presence.mark_read(key, pro, &sent_ids).await.unwrap();
    assert_eq!(transitioned.len(), 5);
    let receipts = text_frames(&mut client_rx);
    let receipt = receipts
        .iter()
        .find(|f| f["type"] == "messages-marked-read")
        .expect("client should see a read receipt");
    assert_eq!(receipt["message_ids"].as_array().unwrap().len(), 5);

    // Marking again is a no-op, not an error, and produces no receipt.
    let again = e.presence.mark_read(key, pro, &sent_ids).await.unwrap();
    assert!(again.is_empty());
    assert!(text_frames(&mut client_rx)
        .iter()
        .all(|f| f["type"] != "messages-marked-read"));
}

#[tokio::test]
async fn offline_recipient_triggers_push_dispatch() {
    let mut e = engine(10);
    let (client, pro) = (e.client.user_id, e.professional.user_id);
    let (key, _) = e.conversations.open_or_create(client, pro).await.unwrap();

    e.preferences
        .update(NotificationPreference {
            user_id: pro,
            push_enabled: true,
            email_enabled: false,
            push_token: Some("pro-device-token".into()),
        })
        .await
        .unwrap();

    // Nobody is joined; the ack stays at `sent` and the detached dispatch
    // reaches the push gateway.
    let record = e
        .messages
        .send(send_input(key, client, "are you available Friday?"))
        .await
        .unwrap();
    assert_eq!(record.status, MessageStatus::Sent);

    let token = tokio::time::timeout(Duration::from_secs(2), e.push_sends.recv())
        .await
        .expect("dispatch should reach the push provider")
        .unwrap();
    assert_eq!(token, "pro-device-token");
}

#[tokio::test]
async fn live_recipient_suppresses_the_backstop_dispatch() {
    let mut e = engine(10);
    let (client, pro) = (e.client.user_id, e.professional.user_id);
    let (key, _) = e.conversations.open_or_create(client, pro).await.unwrap();

    e.preferences
        .update(NotificationPreference {
            user_id: pro,
            push_enabled: true,
            email_enabled: false,
            push_token: Some("pro-device-token".into()),
        })
        .await
        .unwrap();

    let _pro_rx = e.registry.add_subscriber(key, pro).await;
    e.messages
        .send(send_input(key, client, "ping"))
        .await
        .unwrap();

    // Give the detached task room to run; it must decide not to dispatch.
    let outcome = tokio::time::timeout(Duration::from_millis(200), e.push_sends.recv()).await;
    assert!(outcome.is_err(), "live recipient must not be pushed");
}

#[tokio::test]
async fn ambiguous_key_recovers_through_history_or_fails_unresolvable() {
    let e = engine(10);
    let (client, pro) = (e.client.user_id, e.professional.user_id);
    let (key, _) = e.conversations.open_or_create(client, pro).await.unwrap();

    // A bare uuid is the ambiguous legacy form.
    let raw = pro.to_string();
    assert!(matches!(
        ConversationKey::parse(&raw),
        Err(artisa_messaging::conversation_key::KeyError::Ambiguous)
    ));

    // No history yet: unresolvable.
    let err = e
        .conversations
        .resolve_conversation(client, &raw)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unresolvable));

    // After a message flows, the same input resolves to the canonical key.
    e.messages
        .send(send_input(key, client, "hello"))
        .await
        .unwrap();
    let resolved = e
        .conversations
        .resolve_conversation(client, &raw)
        .await
        .unwrap();
    assert_eq!(resolved, key);

    // A caller with no history with that id still cannot resolve it.
    let stranger = Uuid::new_v4();
    e.directory.insert(Participant {
        user_id: stranger,
        display_name: "Sally Stranger".into(),
        role: Role::Client,
        email: None,
    });
    let err = e
        .conversations
        .resolve_conversation(stranger, &raw)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unresolvable));
}

#[tokio::test]
async fn conversation_summaries_reflect_activity_and_unread() {
    let e = engine(10);
    let (client, pro) = (e.client.user_id, e.professional.user_id);
    let (key, _) = e.conversations.open_or_create(client, pro).await.unwrap();

    e.messages
        .send(send_input(key, client, "first"))
        .await
        .unwrap();
    e.messages
        .send(send_input(key, client, "second"))
        .await
        .unwrap();

    let summaries = e.conversations.list_for_user(pro).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].conversation_key, key);
    assert_eq!(summaries[0].unread_count, 2);
    assert_eq!(summaries[0].last_message.text.as_deref(), Some("second"));
}
