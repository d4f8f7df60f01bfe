//! In-memory collaborators, used by the test suite and DATABASE_URL-less
//! local runs. Semantics mirror the Postgres implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    ImageStorage, MessageStore, ParticipantDirectory, PreferenceStore, HISTORY_LIMIT_CAP,
};
use crate::conversation_key::ConversationKey;
use crate::error::AppError;
use crate::models::{
    ConversationSummary, MessageRecord, MessageStatus, NewMessage, NotificationPreference,
    Participant,
};

#[derive(Default)]
pub struct MemoryMessageStore {
    inner: Mutex<MessageLog>,
}

#[derive(Default)]
struct MessageLog {
    messages: Vec<MessageRecord>,
    last_created: HashMap<ConversationKey, DateTime<Utc>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: NewMessage) -> Result<MessageRecord, AppError> {
        let mut log = self.inner.lock();

        // Clamp so a reader listing history never observes a timestamp
        // regression within one conversation.
        let now = Utc::now();
        let created_at = match log.last_created.get(&message.conversation_key) {
            Some(last) if *last >= now => *last + ChronoDuration::microseconds(1),
            _ => now,
        };
        log.last_created.insert(message.conversation_key, created_at);

        let record = MessageRecord {
            id: Uuid::new_v4(),
            conversation_key: message.conversation_key,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            text: message.text,
            image_url: message.image_url,
            status: MessageStatus::Sent,
            created_at,
        };
        log.messages.push(record.clone());
        Ok(record)
    }

    async fn history(
        &self,
        key: &ConversationKey,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let log = self.inner.lock();
        let limit = limit.clamp(1, HISTORY_LIMIT_CAP) as usize;
        let offset = offset.max(0) as usize;

        let mut page: Vec<MessageRecord> = log
            .messages
            .iter()
            .filter(|m| m.conversation_key == *key)
            .cloned()
            .collect();
        page.sort_by_key(|m| m.created_at);
        Ok(page.into_iter().skip(offset).take(limit).collect())
    }

    async fn last_message(&self, key: &ConversationKey) -> Result<Option<MessageRecord>, AppError> {
        let log = self.inner.lock();
        Ok(log
            .messages
            .iter()
            .filter(|m| m.conversation_key == *key)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn mark_delivered(
        &self,
        key: &ConversationKey,
        message_ids: &[Uuid],
    ) -> Result<(), AppError> {
        let mut log = self.inner.lock();
        for message in log.messages.iter_mut() {
            if message.conversation_key == *key
                && message_ids.contains(&message.id)
                && message.status == MessageStatus::Sent
            {
                message.status = MessageStatus::Delivered;
            }
        }
        Ok(())
    }

    async fn mark_read(
        &self,
        key: &ConversationKey,
        reader: Uuid,
        message_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, AppError> {
        let mut log = self.inner.lock();
        let mut transitioned = Vec::new();
        for message in log.messages.iter_mut() {
            if message.conversation_key == *key
                && message_ids.contains(&message.id)
                && message.recipient_id == reader
                && message.status != MessageStatus::Read
            {
                message.status = MessageStatus::Read;
                transitioned.push(message.id);
            }
        }
        Ok(transitioned)
    }

    async fn conversation_summaries(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let log = self.inner.lock();
        let mut by_key: HashMap<ConversationKey, (MessageRecord, i64)> = HashMap::new();

        for message in log.messages.iter() {
            if message.sender_id != user_id && message.recipient_id != user_id {
                continue;
            }
            let unread =
                (message.recipient_id == user_id && message.status != MessageStatus::Read) as i64;
            by_key
                .entry(message.conversation_key)
                .and_modify(|(last, count)| {
                    if message.created_at > last.created_at {
                        *last = message.clone();
                    }
                    *count += unread;
                })
                .or_insert_with(|| (message.clone(), unread));
        }

        let mut summaries: Vec<ConversationSummary> = by_key
            .into_iter()
            .map(|(conversation_key, (last_message, unread_count))| ConversationSummary {
                conversation_key,
                last_message,
                unread_count,
            })
            .collect();
        summaries.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
        Ok(summaries)
    }

    async fn has_messages_between(&self, a: Uuid, b: Uuid) -> Result<bool, AppError> {
        let log = self.inner.lock();
        Ok(log.messages.iter().any(|m| {
            (m.sender_id == a && m.recipient_id == b) || (m.sender_id == b && m.recipient_id == a)
        }))
    }
}

#[derive(Default)]
pub struct MemoryDirectory {
    participants: Mutex<HashMap<Uuid, Participant>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, participant: Participant) {
        self.participants
            .lock()
            .insert(participant.user_id, participant);
    }
}

#[async_trait]
impl ParticipantDirectory for MemoryDirectory {
    async fn find(&self, user_id: Uuid) -> Result<Option<Participant>, AppError> {
        Ok(self.participants.lock().get(&user_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    prefs: Mutex<HashMap<Uuid, NotificationPreference>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn preferences(&self, user_id: Uuid) -> Result<NotificationPreference, AppError> {
        Ok(self
            .prefs
            .lock()
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| NotificationPreference::default_for(user_id)))
    }

    async fn update(&self, prefs: NotificationPreference) -> Result<(), AppError> {
        self.prefs.lock().insert(prefs.user_id, prefs);
        Ok(())
    }
}

/// Hands out opaque URLs without storing anything; stands in for the CDN
/// upload collaborator.
#[derive(Default)]
pub struct MemoryImageStorage;

impl MemoryImageStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageStorage for MemoryImageStorage {
    async fn store_image(
        &self,
        uploader: Uuid,
        _file_name: &str,
        _content_type: &str,
    ) -> Result<String, AppError> {
        Ok(format!(
            "https://cdn.artisa.example/uploads/{}/{}",
            uploader,
            Uuid::new_v4()
        ))
    }
}
