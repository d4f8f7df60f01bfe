use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marketplace role. A valid conversation pairs exactly one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Professional,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Professional => "professional",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "client" => Some(Role::Client),
            "professional" => Some(Role::Professional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: Role,
    pub email: Option<String>,
}
