use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::conversation_key::ConversationKey;

pub mod events;
pub mod handlers;
pub mod message_types;

struct PeerHandle {
    user_id: Uuid,
    tx: UnboundedSender<Message>,
}

/// Live connections per conversation. Events fan out to participants only;
/// closed senders are pruned on the next send.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConversationKey, Vec<PeerHandle>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a joined connection and returns its outbound queue.
    pub async fn add_subscriber(
        &self,
        key: ConversationKey,
        user_id: Uuid,
    ) -> UnboundedReceiver<Message> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        guard.entry(key).or_default().push(PeerHandle { user_id, tx });
        rx
    }

    /// Delivers to every live connection of both participants.
    pub async fn broadcast(&self, key: &ConversationKey, msg: Message) {
        let mut guard = self.inner.write().await;
        if let Some(handles) = guard.get_mut(key) {
            handles.retain(|h| h.tx.send(msg.clone()).is_ok());
            if handles.is_empty() {
                guard.remove(key);
            }
        }
    }

    /// Delivers to one participant's live connections. Returns true if at
    /// least one connection accepted the message.
    pub async fn send_to_user(&self, key: &ConversationKey, user_id: Uuid, msg: Message) -> bool {
        let mut guard = self.inner.write().await;
        let Some(handles) = guard.get_mut(key) else {
            return false;
        };
        let mut delivered = false;
        handles.retain(|h| {
            if h.user_id != user_id {
                return true;
            }
            match h.tx.send(msg.clone()) {
                Ok(()) => {
                    delivered = true;
                    true
                }
                Err(_) => false,
            }
        });
        if handles.is_empty() {
            guard.remove(key);
        }
        delivered
    }

    /// Whether the user has a live joined connection on this conversation.
    /// Backs the dispatcher's reachability decision.
    pub async fn is_connected(&self, key: &ConversationKey, user_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(key)
            .map(|handles| {
                handles
                    .iter()
                    .any(|h| h.user_id == user_id && !h.tx.is_closed())
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::canonical(Uuid::new_v4(), Uuid::new_v4()).unwrap()
    }

    #[tokio::test]
    async fn send_to_user_targets_only_that_user() {
        let registry = ConnectionRegistry::new();
        let k = key();
        let (a, b) = k.participants();

        let mut rx_a = registry.add_subscriber(k, a).await;
        let mut rx_b = registry.add_subscriber(k, b).await;

        assert!(registry.send_to_user(&k, b, Message::Text("hi".into())).await);

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_both_participants() {
        let registry = ConnectionRegistry::new();
        let k = key();
        let (a, b) = k.participants();

        let mut rx_a = registry.add_subscriber(k, a).await;
        let mut rx_b = registry.add_subscriber(k, b).await;

        registry.broadcast(&k, Message::Text("hi".into())).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn dropped_connections_are_pruned_and_unreachable() {
        let registry = ConnectionRegistry::new();
        let k = key();
        let (a, _) = k.participants();

        let rx = registry.add_subscriber(k, a).await;
        assert!(registry.is_connected(&k, a).await);

        drop(rx);
        assert!(!registry.is_connected(&k, a).await);
        assert!(!registry.send_to_user(&k, a, Message::Text("hi".into())).await);
    }
}
