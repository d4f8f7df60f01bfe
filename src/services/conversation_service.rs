//! Conversation operations over the implicit conversation model.
//!
//! There is no conversations table: a thread exists once a message carries
//! its key. What this service owns is the validity of the pairing (one
//! client, one professional, never the same user twice) and the recovery
//! path for keys that arrive in a legacy single-id form.

use std::sync::Arc;

use uuid::Uuid;

use crate::conversation_key::{ConversationKey, KeyError};
use crate::error::AppError;
use crate::models::{ConversationSummary, MessageRecord, Participant};
use crate::store::{MessageStore, ParticipantDirectory, HISTORY_LIMIT_CAP};

pub struct ConversationService {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn ParticipantDirectory>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn MessageStore>, directory: Arc<dyn ParticipantDirectory>) -> Self {
        Self { store, directory }
    }

    /// Validates that the two users form a legal pairing: both exist and
    /// hold complementary roles. Rejected before anything is persisted.
    pub async fn validate_pairing(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<(Participant, Participant), AppError> {
        if a == b {
            return Err(AppError::InvalidPairing(
                "a conversation needs two distinct participants".into(),
            ));
        }
        let first = self
            .directory
            .find(a)
            .await?
            .ok_or_else(|| AppError::InvalidPairing(format!("unknown participant {a}")))?;
        let second = self
            .directory
            .find(b)
            .await?
            .ok_or_else(|| AppError::InvalidPairing(format!("unknown participant {b}")))?;

        if first.role == second.role {
            return Err(AppError::InvalidPairing(format!(
                "a conversation pairs a client with a professional, got two {}s",
                first.role.as_str()
            )));
        }
        Ok((first, second))
    }

    /// Pre-validates a pairing and returns the canonical key plus the last
    /// message if the thread already has history. No row is created; the
    /// conversation comes into being with its first message.
    pub async fn open_or_create(
        &self,
        caller: Uuid,
        other: Uuid,
    ) -> Result<(ConversationKey, Option<MessageRecord>), AppError> {
        self.validate_pairing(caller, other).await?;
        let key = ConversationKey::canonical(caller, other).map_err(AppError::from)?;
        let last = self.store.last_message(&key).await?;
        Ok((key, last))
    }

    /// Parses a key and checks the caller is one of its endpoints.
    pub fn authorize_key(&self, raw: &str, caller: Uuid) -> Result<ConversationKey, AppError> {
        let key = ConversationKey::parse(raw).map_err(AppError::from)?;
        if !key.contains(caller) {
            return Err(AppError::Unauthorized);
        }
        Ok(key)
    }

    pub async fn get(
        &self,
        caller: Uuid,
        raw_key: &str,
    ) -> Result<(ConversationKey, Option<MessageRecord>), AppError> {
        let key = self.authorize_key(raw_key, caller)?;
        let last = self.store.last_message(&key).await?;
        Ok((key, last))
    }

    pub async fn list_for_user(&self, caller: Uuid) -> Result<Vec<ConversationSummary>, AppError> {
        self.store.conversation_summaries(caller).await
    }

    pub async fn history(
        &self,
        caller: Uuid,
        raw_key: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let key = self.authorize_key(raw_key, caller)?;
        self.store
            .history(&key, limit.clamp(1, HISTORY_LIMIT_CAP), offset)
            .await
    }

    /// Recovery path for keys that failed to parse as a pair. If the raw
    /// value is a single opaque id and the caller has message history with
    /// that user, the canonical key for (caller, other) is derived;
    /// otherwise the value is unresolvable.
    pub async fn resolve_conversation(
        &self,
        caller: Uuid,
        raw: &str,
    ) -> Result<ConversationKey, AppError> {
        match ConversationKey::parse(raw) {
            Ok(key) => {
                // Already well-formed; only membership matters.
                if key.contains(caller) {
                    return Ok(key);
                }
                return Err(AppError::Unauthorized);
            }
            Err(KeyError::Ambiguous) => {}
            Err(err) => return Err(err.into()),
        }

        let other = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::MalformedKey("opaque value is not an id".into()))?;
        if other == caller {
            return Err(AppError::InvalidPairing(
                "opaque value resolves to the caller".into(),
            ));
        }

        if self.store.has_messages_between(caller, other).await? {
            ConversationKey::canonical(caller, other).map_err(AppError::from)
        } else {
            Err(AppError::Unresolvable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMessage, Role};
    use crate::store::{MemoryDirectory, MemoryMessageStore};

    struct Fixture {
        service: ConversationService,
        store: Arc<MemoryMessageStore>,
        directory: Arc<MemoryDirectory>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryMessageStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        Fixture {
            service: ConversationService::new(
                store.clone() as Arc<dyn MessageStore>,
                directory.clone() as Arc<dyn ParticipantDirectory>,
            ),
            store,
            directory,
        }
    }

    fn participant(role: Role) -> Participant {
        Participant {
            user_id: Uuid::new_v4(),
            display_name: match role {
                Role::Client => "Carl Client".into(),
                Role::Professional => "Paula Pro".into(),
            },
            role,
            email: None,
        }
    }

    #[tokio::test]
    async fn open_or_create_accepts_client_professional_pair() {
        let f = fixture();
        let client = participant(Role::Client);
        let pro = participant(Role::Professional);
        f.directory.insert(client.clone());
        f.directory.insert(pro.clone());

        let (key, last) = f
            .service
            .open_or_create(client.user_id, pro.user_id)
            .await
            .unwrap();
        assert!(key.contains(client.user_id));
        assert!(key.contains(pro.user_id));
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn same_role_pairing_is_rejected() {
        let f = fixture();
        let a = participant(Role::Client);
        let b = participant(Role::Client);
        f.directory.insert(a.clone());
        f.directory.insert(b.clone());

        let err = f
            .service
            .open_or_create(a.user_id, b.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPairing(_)));
    }

    #[tokio::test]
    async fn self_pairing_is_rejected_before_directory_lookup() {
        let f = fixture();
        let id = Uuid::new_v4();
        let err = f.service.open_or_create(id, id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPairing(_)));
    }

    #[tokio::test]
    async fn unknown_participant_is_invalid_pairing() {
        let f = fixture();
        let client = participant(Role::Client);
        f.directory.insert(client.clone());

        let err = f
            .service
            .open_or_create(client.user_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPairing(_)));
    }

    #[tokio::test]
    async fn non_participant_cannot_read_a_conversation() {
        let f = fixture();
        let key = ConversationKey::canonical(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let outsider = Uuid::new_v4();
        let err = f.service.get(outsider, &key.to_string()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn resolve_recovers_from_history() {
        let f = fixture();
        let caller = Uuid::new_v4();
        let other = Uuid::new_v4();
        let key = ConversationKey::canonical(caller, other).unwrap();
        f.store
            .append(NewMessage {
                conversation_key: key,
                sender_id: other,
                recipient_id: caller,
                text: Some("hi".into()),
                image_url: None,
            })
            .await
            .unwrap();

        let resolved = f
            .service
            .resolve_conversation(caller, &other.to_string())
            .await
            .unwrap();
        assert_eq!(resolved, key);
    }

    #[tokio::test]
    async fn resolve_without_history_is_unresolvable() {
        let f = fixture();
        let caller = Uuid::new_v4();
        let err = f
            .service
            .resolve_conversation(caller, &Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unresolvable));
    }

    #[tokio::test]
    async fn resolve_passes_through_well_formed_keys() {
        let f = fixture();
        let caller = Uuid::new_v4();
        let key = ConversationKey::canonical(caller, Uuid::new_v4()).unwrap();
        let resolved = f
            .service
            .resolve_conversation(caller, &key.to_string())
            .await
            .unwrap();
        assert_eq!(resolved, key);
    }

    #[tokio::test]
    async fn resolve_rejects_garbage_as_malformed() {
        let f = fixture();
        let err = f
            .service
            .resolve_conversation(Uuid::new_v4(), "definitely-not-a-key")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedKey(_)));
    }
}
