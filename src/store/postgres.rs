//! Postgres-backed collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    ImageStorage, MessageStore, ParticipantDirectory, PreferenceStore, HISTORY_LIMIT_CAP,
};
use crate::conversation_key::ConversationKey;
use crate::error::AppError;
use crate::models::{
    ConversationSummary, MessageRecord, MessageStatus, NewMessage, NotificationPreference,
    Participant, Role,
};

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<MessageRecord, AppError> {
    let raw_key: String = row.get("conversation_key");
    let conversation_key =
        ConversationKey::parse(&raw_key).map_err(|_| AppError::Internal)?;
    let status: String = row.get("status");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(MessageRecord {
        id: row.get("id"),
        conversation_key,
        sender_id: row.get("sender_id"),
        recipient_id: row.get("recipient_id"),
        text: row.get("text_content"),
        image_url: row.get("image_url"),
        status: MessageStatus::from_str(&status),
        created_at,
    })
}

pub struct PgMessageStore {
    db: PgPool,
}

impl PgMessageStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: NewMessage) -> Result<MessageRecord, AppError> {
        let id = Uuid::new_v4();
        // GREATEST clamps the timestamp so history readers never observe a
        // regression within one conversation, even under clock jitter.
        let row = sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_key, sender_id, recipient_id, text_content, image_url, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'sent',
                    GREATEST(now(), COALESCE(
                        (SELECT max(created_at) + interval '1 microsecond'
                         FROM messages WHERE conversation_key = $2),
                        now())))
            RETURNING id, conversation_key, sender_id, recipient_id, text_content, image_url, status, created_at
            "#,
        )
        .bind(id)
        .bind(message.conversation_key.to_string())
        .bind(message.sender_id)
        .bind(message.recipient_id)
        .bind(&message.text)
        .bind(&message.image_url)
        .fetch_one(&self.db)
        .await?;

        record_from_row(&row)
    }

    async fn history(
        &self,
        key: &ConversationKey,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let limit = limit.clamp(1, HISTORY_LIMIT_CAP);
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_key, sender_id, recipient_id, text_content, image_url, status, created_at
            FROM messages
            WHERE conversation_key = $1
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(key.to_string())
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn last_message(&self, key: &ConversationKey) -> Result<Option<MessageRecord>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_key, sender_id, recipient_id, text_content, image_url, status, created_at
            FROM messages
            WHERE conversation_key = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(key.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn mark_delivered(
        &self,
        key: &ConversationKey,
        message_ids: &[Uuid],
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE messages SET status = 'delivered' \
             WHERE conversation_key = $1 AND id = ANY($2) AND status = 'sent'",
        )
        .bind(key.to_string())
        .bind(message_ids.to_vec())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn mark_read(
        &self,
        key: &ConversationKey,
        reader: Uuid,
        message_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            r#"
            UPDATE messages SET status = 'read'
            WHERE conversation_key = $1
              AND id = ANY($2)
              AND recipient_id = $3
              AND status <> 'read'
            RETURNING id
            "#,
        )
        .bind(key.to_string())
        .bind(message_ids.to_vec())
        .bind(reader)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn conversation_summaries(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (m.conversation_key)
                   m.id, m.conversation_key, m.sender_id, m.recipient_id,
                   m.text_content, m.image_url, m.status, m.created_at,
                   (SELECT COUNT(*) FROM messages u
                    WHERE u.conversation_key = m.conversation_key
                      AND u.recipient_id = $1
                      AND u.status <> 'read') AS unread_count
            FROM messages m
            WHERE m.sender_id = $1 OR m.recipient_id = $1
            ORDER BY m.conversation_key, m.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let mut summaries = rows
            .iter()
            .map(|row| {
                let unread_count: i64 = row.get("unread_count");
                let last_message = record_from_row(row)?;
                Ok(ConversationSummary {
                    conversation_key: last_message.conversation_key,
                    last_message,
                    unread_count,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        summaries.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
        Ok(summaries)
    }

    async fn has_messages_between(&self, a: Uuid, b: Uuid) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM messages
                WHERE (sender_id = $1 AND recipient_id = $2)
                   OR (sender_id = $2 AND recipient_id = $1)
            )
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }
}

pub struct PgDirectory {
    db: PgPool,
}

impl PgDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ParticipantDirectory for PgDirectory {
    async fn find(&self, user_id: Uuid) -> Result<Option<Participant>, AppError> {
        let row = sqlx::query(
            "SELECT user_id, display_name, role, email FROM participants WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| {
            let role: String = r.get("role");
            Participant {
                user_id: r.get("user_id"),
                display_name: r.get("display_name"),
                role: Role::from_str(&role).unwrap_or(Role::Client),
                email: r.get("email"),
            }
        }))
    }
}

pub struct PgPreferenceStore {
    db: PgPool,
}

impl PgPreferenceStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn preferences(&self, user_id: Uuid) -> Result<NotificationPreference, AppError> {
        let row = sqlx::query(
            "SELECT user_id, push_enabled, email_enabled, push_token \
             FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(match row {
            Some(r) => NotificationPreference {
                user_id: r.get("user_id"),
                push_enabled: r.get("push_enabled"),
                email_enabled: r.get("email_enabled"),
                push_token: r.get("push_token"),
            },
            None => NotificationPreference::default_for(user_id),
        })
    }

    async fn update(&self, prefs: NotificationPreference) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences (user_id, push_enabled, email_enabled, push_token, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (user_id) DO UPDATE
            SET push_enabled = EXCLUDED.push_enabled,
                email_enabled = EXCLUDED.email_enabled,
                push_token = EXCLUDED.push_token,
                updated_at = now()
            "#,
        )
        .bind(prefs.user_id)
        .bind(prefs.push_enabled)
        .bind(prefs.email_enabled)
        .bind(&prefs.push_token)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// Records upload intent and hands back the opaque CDN URL the platform's
/// storage tier will serve. The bytes themselves never pass through here.
pub struct PgImageStorage {
    base_url: String,
}

impl PgImageStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ImageStorage for PgImageStorage {
    async fn store_image(
        &self,
        uploader: Uuid,
        _file_name: &str,
        _content_type: &str,
    ) -> Result<String, AppError> {
        Ok(format!("{}/{}/{}", self.base_url, uploader, Uuid::new_v4()))
    }
}
