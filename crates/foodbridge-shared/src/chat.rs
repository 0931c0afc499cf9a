//! Two-party conversations and their messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_CHARS;
use crate::error::ValidationError;
use crate::surplus::SurplusRecord;
use crate::types::{ChatId, MessageId, Party, Role, SurplusId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

impl Participant {
    pub fn party(&self) -> Party {
        Party {
            id: self.id.clone(),
            role: self.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub participants: [Participant; 2],
    /// The delivery this conversation was opened for, if any.
    pub delivery_surplus_id: Option<SurplusId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn participant(&self, id: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// The other side of the conversation from `id`'s point of view.
    pub fn counterpart(&self, id: &UserId) -> Option<&Participant> {
        match &self.participants {
            [a, b] if &a.id == id => Some(b),
            [a, b] if &b.id == id => Some(a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    /// Store insertion counter, breaks ties between equal timestamps.
    pub seq: i64,
    pub sender_id: UserId,
    pub sender_role: Role,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Key identifying an unordered participant pair.  Length-prefixed so that
/// ids containing the separator cannot collide.
pub fn pair_key(a: &UserId, b: &UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}|{}", lo.as_str().len(), lo, hi)
}

/// Archival applies to drivers only: their chat disappears from the list once
/// the linked delivery is collected or expired.  Canteens and NGOs keep it.
pub fn is_archived_for(role: Role, linked: Option<&SurplusRecord>) -> bool {
    role == Role::Driver && linked.is_some_and(|r| r.is_terminal())
}

/// Readers may receive messages out of order; always sort before display.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.seq.cmp(&b.seq)));
}

/// Trimmed message body, or the reason it cannot be sent.
pub fn validate_text(text: &str) -> Result<&str, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ValidationError::MessageTooLong {
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::surplus::fixtures::{available, t0};
    use crate::types::SurplusStatus;

    fn message(seq: i64, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::new(),
            chat_id: ChatId(uuid::Uuid::nil()),
            seq,
            sender_id: UserId::from("n1"),
            sender_role: Role::Ngo,
            text: format!("m{seq}"),
            sent_at: at,
        }
    }

    #[test]
    fn pair_key_is_unordered() {
        let a = UserId::from("alice");
        let b = UserId::from("bob");
        assert_eq!(pair_key(&a, &b), pair_key(&b, &a));
        assert_ne!(
            pair_key(&UserId::from("a|b"), &UserId::from("c")),
            pair_key(&UserId::from("a"), &UserId::from("b|c"))
        );
    }

    #[test]
    fn archival_is_driver_specific() {
        let mut r = available("c1");
        r.status = SurplusStatus::Collected;
        assert!(is_archived_for(Role::Driver, Some(&r)));
        assert!(!is_archived_for(Role::Canteen, Some(&r)));
        assert!(!is_archived_for(Role::Ngo, Some(&r)));
        assert!(!is_archived_for(Role::Driver, None));

        r.status = SurplusStatus::Claimed;
        assert!(!is_archived_for(Role::Driver, Some(&r)));
    }

    #[test]
    fn messages_sorted_by_time_then_insertion() {
        let mut msgs = vec![
            message(3, t0() + Duration::seconds(5)),
            message(2, t0()),
            message(1, t0()),
        ];
        sort_messages(&mut msgs);
        let order: Vec<i64> = msgs.iter().map(|m| m.seq).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn text_validation() {
        assert_eq!(validate_text("  hi  ").unwrap(), "hi");
        assert_eq!(validate_text(" \n "), Err(ValidationError::EmptyMessage));
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(validate_text(&long).is_err());
    }
}
