//! Collaborator seams.
//!
//! Every external dependency of the engine — the durable message log, the
//! participant directory, the preference document, image storage — is an
//! injected trait object. Components receive their collaborators in their
//! constructors; nothing resolves a connection mid-function.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::conversation_key::ConversationKey;
use crate::error::AppError;
use crate::models::{ConversationSummary, MessageRecord, NewMessage, NotificationPreference, Participant};

pub use memory::{MemoryDirectory, MemoryImageStorage, MemoryMessageStore, MemoryPreferenceStore};
pub use postgres::{PgDirectory, PgImageStorage, PgMessageStore, PgPreferenceStore};

/// History page size cap, matching what a client can reasonably render.
pub const HISTORY_LIMIT_CAP: i64 = 200;

/// Durable append-only message log keyed by conversation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message, assigning id and creation timestamp. Timestamps
    /// are non-decreasing within a conversation as observed by a reader.
    async fn append(&self, message: NewMessage) -> Result<MessageRecord, AppError>;

    /// Chronological page of a conversation's history.
    async fn history(
        &self,
        key: &ConversationKey,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRecord>, AppError>;

    async fn last_message(&self, key: &ConversationKey) -> Result<Option<MessageRecord>, AppError>;

    /// Advances `sent → delivered`. Already-delivered or read ids are left
    /// alone; status never regresses.
    async fn mark_delivered(
        &self,
        key: &ConversationKey,
        message_ids: &[Uuid],
    ) -> Result<(), AppError>;

    /// Marks the given ids read, but only those whose recipient is `reader`.
    /// Idempotent: returns the ids that actually transitioned, so a repeat
    /// call returns an empty list and is not an error.
    async fn mark_read(
        &self,
        key: &ConversationKey,
        reader: Uuid,
        message_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, AppError>;

    /// The caller's conversations, most recent activity first.
    async fn conversation_summaries(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, AppError>;

    /// Whether any message has ever flowed between the two users, in either
    /// direction. Backs the ambiguous-key recovery path.
    async fn has_messages_between(&self, a: Uuid, b: Uuid) -> Result<bool, AppError>;
}

/// Read access to marketplace participants (owned by the profile service).
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn find(&self, user_id: Uuid) -> Result<Option<Participant>, AppError>;
}

/// Per-user notification preference document.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Returns stored preferences, falling back to defaults for users who
    /// never touched settings.
    async fn preferences(&self, user_id: Uuid) -> Result<NotificationPreference, AppError>;

    async fn update(&self, prefs: NotificationPreference) -> Result<(), AppError>;
}

/// Produces an opaque URL for an uploaded image. Storage mechanics are not
/// this service's concern.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    async fn store_image(
        &self,
        uploader: Uuid,
        file_name: &str,
        content_type: &str,
    ) -> Result<String, AppError>;
}
