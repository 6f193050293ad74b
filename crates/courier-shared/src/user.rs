use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Presence-relevant account fields. The live online flag is never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Display metadata attached to presence and typing events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceProfile {
    pub user_id: UserId,
    pub full_name: String,
    pub profile_pic: Option<String>,
}

impl PresenceProfile {
    /// Fallback profile for a connection whose user row is missing.
    pub fn anonymous(user_id: UserId) -> Self {
        Self {
            full_name: user_id.to_string(),
            user_id,
            profile_pic: None,
        }
    }
}

impl From<&User> for PresenceProfile {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            full_name: user.display_name.clone(),
            profile_pic: user.avatar.clone(),
        }
    }
}
