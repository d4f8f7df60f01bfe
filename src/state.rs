use std::sync::Arc;

use crate::config::Config;
use crate::presence::PresenceTracker;
use crate::ratelimit::RateLimiter;
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::MessageService;
use crate::services::notification_service::NotificationDispatcher;
use crate::store::{ImageStorage, PreferenceStore};
use crate::websocket::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub rate_limiter: Arc<RateLimiter>,
    pub presence: Arc<PresenceTracker>,
    pub conversations: Arc<ConversationService>,
    pub messages: Arc<MessageService>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub uploads: Arc<dyn ImageStorage>,
}
