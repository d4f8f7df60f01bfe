use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-user notification switches, read by the dispatcher and mutated only
/// through explicit settings updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: Uuid,
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub push_token: Option<String>,
}

impl NotificationPreference {
    /// Defaults for a user who has never touched settings: push on (token
    /// still required before anything is sent), email off.
    pub fn default_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            push_enabled: true,
            email_enabled: false,
            push_token: None,
        }
    }
}
