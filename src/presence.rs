//! Ephemeral per-conversation state: typing indicators and read receipts.
//!
//! Typing state expires on its own. A flaky client that never sends
//! `typing: false` must not leave a stale indicator, so every renewal bumps a
//! generation counter and the expiry task clears the flag only if its
//! generation is still current — a renew racing an expiry can never flap the
//! flag off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::conversation_key::ConversationKey;
use crate::error::AppError;
use crate::store::MessageStore;
use crate::websocket::events::WsOutboundEvent;
use crate::websocket::ConnectionRegistry;

#[derive(Clone)]
pub struct PresenceTracker {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    debounce: Duration,
    typing: Arc<Mutex<HashMap<(ConversationKey, Uuid), u64>>>,
    // Never reused, so a timer armed before an explicit stop can never match
    // a flag set afterwards.
    next_generation: Arc<AtomicU64>,
}

impl PresenceTracker {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn MessageStore>,
        debounce: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            debounce,
            typing: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn emit_typing(&self, key: &ConversationKey, user_id: Uuid, is_typing: bool) {
        let Some(peer) = key.peer_of(user_id) else {
            return;
        };
        let event = WsOutboundEvent::TypingChanged {
            conversation_key: *key,
            user_id,
            is_typing,
        };
        self.registry
            .send_to_user(key, peer, event.to_ws_message())
            .await;
    }

    /// Sets or renews the typing flag. A `true` (re)starts the expiry timer;
    /// the peer sees `typing-changed` only on actual transitions, not on
    /// every renewal keystroke.
    pub async fn set_typing(&self, key: ConversationKey, user_id: Uuid, is_typing: bool) {
        if !is_typing {
            let was_typing = self.typing.lock().remove(&(key, user_id)).is_some();
            if was_typing {
                self.emit_typing(&key, user_id, false).await;
            }
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let started = self
            .typing
            .lock()
            .insert((key, user_id), generation)
            .is_none();

        if started {
            self.emit_typing(&key, user_id, true).await;
        }

        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tracker.debounce).await;
            // Conditional clear: a renewal after this timer was scheduled
            // bumped the generation, and this expiry no-ops.
            let expired = {
                let mut typing = tracker.typing.lock();
                match typing.get(&(key, user_id)) {
                    Some(current) if *current == generation => {
                        typing.remove(&(key, user_id));
                        true
                    }
                    _ => false,
                }
            };
            if expired {
                tracker.emit_typing(&key, user_id, false).await;
            }
        });
    }

    pub fn is_typing(&self, key: &ConversationKey, user_id: Uuid) -> bool {
        self.typing.lock().contains_key(&(*key, user_id))
    }

    /// Marks messages read on behalf of `reader` and propagates a receipt to
    /// both endpoints. Only ids whose recipient is the reader transition;
    /// repeats are no-ops, and a batch that transitions nothing broadcasts
    /// nothing.
    pub async fn mark_read(
        &self,
        key: ConversationKey,
        reader: Uuid,
        message_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, AppError> {
        let transitioned = self.store.mark_read(&key, reader, message_ids).await?;
        if !transitioned.is_empty() {
            let event = WsOutboundEvent::MessagesMarkedRead {
                conversation_key: key,
                reader_id: reader,
                message_ids: transitioned.clone(),
            };
            self.registry.broadcast(&key, event.to_ws_message()).await;
        }
        Ok(transitioned)
    }
}
