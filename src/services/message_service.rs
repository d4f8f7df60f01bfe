//! The send pipeline.
//!
//! Order matters: rate limit, validate, persist, ack, deliver, dispatch.
//! Persistence is the only step allowed to fail after the limiter consumed a
//! slot, and nothing is acknowledged that was not durably stored. The
//! notification hand-off runs as a detached task so the sender's ack never
//! waits on an external provider.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::conversation_key::ConversationKey;
use crate::error::AppError;
use crate::models::{MessageRecord, MessageStatus, NewMessage};
use crate::ratelimit::{OpClass, RateLimiter};
use crate::services::notification_service::NotificationDispatcher;
use crate::store::{MessageStore, ParticipantDirectory};
use crate::websocket::events::WsOutboundEvent;
use crate::websocket::ConnectionRegistry;

pub struct SendInput {
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

pub struct MessageService {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn ParticipantDirectory>,
    registry: ConnectionRegistry,
    rate_limiter: Arc<RateLimiter>,
    dispatcher: Arc<NotificationDispatcher>,
    max_text_len: usize,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ParticipantDirectory>,
        registry: ConnectionRegistry,
        rate_limiter: Arc<RateLimiter>,
        dispatcher: Arc<NotificationDispatcher>,
        max_text_len: usize,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            rate_limiter,
            dispatcher,
            max_text_len,
        }
    }

    fn validate_content(&self, input: &SendInput) -> Result<(), AppError> {
        let text = input.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let image_url = input
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        if text.is_none() && image_url.is_none() {
            return Err(AppError::Validation(
                "a message needs text or an image".into(),
            ));
        }
        if let Some(text) = text {
            if text.chars().count() > self.max_text_len {
                return Err(AppError::Validation(format!(
                    "message text exceeds {} characters",
                    self.max_text_len
                )));
            }
        }
        if let Some(url) = image_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(AppError::Validation("image_url must be an http(s) URL".into()));
            }
        }
        Ok(())
    }

    /// Accepts a message from a joined sender. Returns the stored record with
    /// its final status: `delivered` if the recipient had a live connection
    /// that took the event, `sent` otherwise.
    pub async fn send(&self, input: SendInput) -> Result<MessageRecord, AppError> {
        let decision = self
            .rate_limiter
            .check_and_consume(OpClass::Message, input.sender_id)
            .await?;
        if !decision.allowed {
            return Err(AppError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        self.validate_content(&input)?;

        let recipient_id = input
            .conversation_key
            .peer_of(input.sender_id)
            .ok_or(AppError::Unauthorized)?;

        // Persistence failure aborts the send; the caller gets the error and
        // no ack is emitted for a message that was never stored.
        let mut record = self
            .store
            .append(NewMessage {
                conversation_key: input.conversation_key,
                sender_id: input.sender_id,
                recipient_id,
                text: input
                    .text
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty()),
                image_url: input
                    .image_url
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty()),
            })
            .await?;

        // Synchronous delivery to a live peer connection, if any.
        let event = WsOutboundEvent::MessageReceived {
            message: record.clone(),
        };
        let delivered = self
            .registry
            .send_to_user(&record.conversation_key, recipient_id, event.to_ws_message())
            .await;
        if delivered {
            record.status = MessageStatus::Delivered;
            if let Err(e) = self
                .store
                .mark_delivered(&record.conversation_key, &[record.id])
                .await
            {
                // The recipient saw the message; a failed status write is
                // recoverable by the next read receipt.
                warn!(message_id = %record.id, error = %e, "failed to persist delivered status");
            }
        }

        self.spawn_dispatch(&record);

        Ok(record)
    }

    /// Fire-and-forget notification hand-off. Runs off the ack path; any
    /// outcome including total failure stays inside the dispatcher.
    fn spawn_dispatch(&self, record: &MessageRecord) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let directory = Arc::clone(&self.directory);
        let key = record.conversation_key;
        let recipient_id = record.recipient_id;
        let sender_id = record.sender_id;
        let preview = record
            .text
            .clone()
            .unwrap_or_else(|| "Sent you a photo".to_string());

        tokio::spawn(async move {
            let sender_name = match directory.find(sender_id).await {
                Ok(Some(participant)) => participant.display_name,
                _ => "Someone".to_string(),
            };
            dispatcher
                .notify_if_unreachable(&key, recipient_id, &sender_name, &preview)
                .await;
        });
    }
}
