//! Notification dispatch.
//!
//! Invoked off the message-send critical path. The recipient's preferences
//! gate each channel independently; a channel failing is logged and counted,
//! never surfaced to the sender. Both channels unavailable is a no-op result,
//! not an error.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation_key::ConversationKey;
use crate::metrics;
use crate::services::email::EmailService;
use crate::services::push::PushProvider;
use crate::store::{ParticipantDirectory, PreferenceStore};
use crate::websocket::ConnectionRegistry;

const PREVIEW_MAX_CHARS: usize = 140;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Channel disabled, destination missing, or provider not configured.
    Skipped,
    Sent,
    /// Delivery attempted and failed; the failure stays here.
    Failed(String),
}

impl ChannelOutcome {
    fn label(&self) -> &'static str {
        match self {
            ChannelOutcome::Skipped => "skipped",
            ChannelOutcome::Sent => "sent",
            ChannelOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub push: ChannelOutcome,
    pub email: ChannelOutcome,
}

impl DispatchOutcome {
    pub fn noop() -> Self {
        Self {
            push: ChannelOutcome::Skipped,
            email: ChannelOutcome::Skipped,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.push == ChannelOutcome::Skipped && self.email == ChannelOutcome::Skipped
    }
}

pub struct NotificationDispatcher {
    registry: ConnectionRegistry,
    directory: Arc<dyn ParticipantDirectory>,
    preferences: Arc<dyn PreferenceStore>,
    push: Option<Arc<dyn PushProvider>>,
    email: Option<EmailService>,
}

impl NotificationDispatcher {
    pub fn new(
        registry: ConnectionRegistry,
        directory: Arc<dyn ParticipantDirectory>,
        preferences: Arc<dyn PreferenceStore>,
        push: Option<Arc<dyn PushProvider>>,
        email: Option<EmailService>,
    ) -> Self {
        Self {
            registry,
            directory,
            preferences,
            push,
            email,
        }
    }

    /// Backstop entry point used by the send pipeline: a recipient with a
    /// live joined connection already saw the message in real time, so
    /// out-of-band channels stay quiet.
    pub async fn notify_if_unreachable(
        &self,
        key: &ConversationKey,
        recipient_id: Uuid,
        sender_name: &str,
        preview: &str,
    ) -> DispatchOutcome {
        if self.registry.is_connected(key, recipient_id).await {
            return DispatchOutcome::noop();
        }
        self.notify(recipient_id, sender_name, preview).await
    }

    /// Dispatches to each enabled channel independently. Infallible by
    /// design: partial failures land in the outcome and the logs.
    pub async fn notify(
        &self,
        recipient_id: Uuid,
        sender_name: &str,
        preview: &str,
    ) -> DispatchOutcome {
        let prefs = match self.preferences.preferences(recipient_id).await {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(%recipient_id, error = %e, "preference lookup failed; skipping dispatch");
                return DispatchOutcome::noop();
            }
        };

        let preview = truncate_preview(preview);
        let title = format!("New message from {sender_name}");

        let push_outcome = self.dispatch_push(&prefs, &title, &preview).await;
        let email_outcome = self.dispatch_email(&prefs, sender_name, &preview).await;

        metrics::NOTIFICATIONS_TOTAL
            .with_label_values(&["push", push_outcome.label()])
            .inc();
        metrics::NOTIFICATIONS_TOTAL
            .with_label_values(&["email", email_outcome.label()])
            .inc();

        let outcome = DispatchOutcome {
            push: push_outcome,
            email: email_outcome,
        };
        if outcome.is_noop() {
            info!(%recipient_id, "no notification channel enabled; nothing dispatched");
        }
        outcome
    }

    async fn dispatch_push(
        &self,
        prefs: &crate::models::NotificationPreference,
        title: &str,
        preview: &str,
    ) -> ChannelOutcome {
        if !prefs.push_enabled {
            return ChannelOutcome::Skipped;
        }
        let Some(token) = prefs.push_token.as_ref().filter(|t| !t.trim().is_empty()) else {
            return ChannelOutcome::Skipped;
        };
        let Some(provider) = &self.push else {
            return ChannelOutcome::Skipped;
        };

        match provider
            .send(token.clone(), title.to_string(), preview.to_string())
            .await
        {
            Ok(()) => ChannelOutcome::Sent,
            Err(e) => {
                warn!(recipient_id = %prefs.user_id, error = %e, "push delivery degraded");
                ChannelOutcome::Failed(e.to_string())
            }
        }
    }

    async fn dispatch_email(
        &self,
        prefs: &crate::models::NotificationPreference,
        sender_name: &str,
        preview: &str,
    ) -> ChannelOutcome {
        if !prefs.email_enabled {
            return ChannelOutcome::Skipped;
        }
        let Some(service) = &self.email else {
            return ChannelOutcome::Skipped;
        };

        let recipient_id = prefs.user_id;
        let address = match self.directory.find(recipient_id).await {
            Ok(Some(participant)) => participant.email,
            Ok(None) => None,
            Err(e) => {
                warn!(%recipient_id, error = %e, "directory lookup failed for email dispatch");
                return ChannelOutcome::Failed(e.to_string());
            }
        };
        let Some(address) = address.filter(|a| !a.trim().is_empty()) else {
            return ChannelOutcome::Skipped;
        };

        match service
            .send_message_notification(&address, sender_name, preview)
            .await
        {
            Ok(()) => ChannelOutcome::Sent,
            Err(e) => {
                warn!(%recipient_id, error = %e, "email delivery degraded");
                ChannelOutcome::Failed(e.to_string())
            }
        }
    }
}

fn truncate_preview(preview: &str) -> String {
    if preview.chars().count() <= PREVIEW_MAX_CHARS {
        return preview.to_string();
    }
    let truncated: String = preview.chars().take(PREVIEW_MAX_CHARS - 1).collect();
    format!("{truncated}…")
}
