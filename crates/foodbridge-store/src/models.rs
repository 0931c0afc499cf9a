//! Persisted model structs.
//!
//! Surplus records, chats and messages are defined in `foodbridge-shared`
//! because the pure engines operate on them; they are re-exported here so
//! store callers need a single import path.

use chrono::{DateTime, Utc};

pub use foodbridge_shared::chat::{Chat, Message, Participant};
pub use foodbridge_shared::surplus::{Precondition, SurplusPatch, SurplusRecord};
use foodbridge_shared::types::{Party, Role, UserId};

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

/// A directory entry.  Identity itself is owned by the external identity
/// provider; this is the name and canonical role it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    /// When this user was first registered locally.
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn party(&self) -> Party {
        Party {
            id: self.id.clone(),
            role: self.role,
        }
    }

    pub fn participant(&self) -> Participant {
        Participant {
            id: self.id.clone(),
            name: self.display_name.clone(),
            role: self.role,
        }
    }
}
