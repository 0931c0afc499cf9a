//! Collaborator traits the services are written against.
//!
//! [`Database`](crate::Database) implements all of them; tests may wrap or
//! replace it.

use chrono::{DateTime, Utc};
use foodbridge_shared::chat::{Chat, Message, Participant};
use foodbridge_shared::surplus::{Precondition, SurplusPatch, SurplusRecord};
use foodbridge_shared::types::{ChatId, Party, SurplusId, UserId};

use crate::error::Result;
use crate::models::UserProfile;
use crate::surplus::SurplusQuery;

/// Result of a compare-and-set style write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The precondition held and the write was applied.
    Applied(T),
    /// The row exists but no longer matches the precondition.
    PredicateFailed,
    NotFound,
}

pub trait SurplusStore {
    fn insert_surplus(&self, record: &SurplusRecord) -> Result<()>;

    /// Fails with [`StoreError::NotFound`](crate::StoreError::NotFound).
    fn read_surplus(&self, id: SurplusId) -> Result<SurplusRecord>;

    /// Apply `patch` only if the stored row still matches `expected`.  On
    /// success the revision is incremented and the new row returned.
    fn conditional_update(
        &self,
        id: SurplusId,
        expected: &Precondition,
        patch: &SurplusPatch,
    ) -> Result<CasOutcome<SurplusRecord>>;

    fn conditional_delete(&self, id: SurplusId, expected: &Precondition) -> Result<CasOutcome<()>>;

    fn query_surplus(&self, query: &SurplusQuery) -> Result<Vec<SurplusRecord>>;
}

pub trait ChatStore {
    /// Return the chat for the unordered pair `{a, b}`, creating it (with
    /// `link`, if given) when none exists.  At most one chat per pair.
    fn get_or_create_chat(
        &self,
        a: &Participant,
        b: &Participant,
        link: Option<SurplusId>,
        now: DateTime<Utc>,
    ) -> Result<Chat>;

    fn get_chat(&self, id: ChatId) -> Result<Chat>;

    /// Stamp a delivery link on a chat that has none.  Returns `false` when
    /// the chat was already linked.
    fn link_chat(&self, id: ChatId, surplus_id: SurplusId) -> Result<bool>;

    /// All chats `user` participates in, most recently active first.
    fn chats_for_user(&self, user: &UserId) -> Result<Vec<Chat>>;

    fn append_message(
        &self,
        chat_id: ChatId,
        sender: &Party,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<Message>;

    /// Messages in `(sent_at, seq)` order.
    fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>>;
}

pub trait UserDirectory {
    fn upsert_user(&self, profile: &UserProfile) -> Result<UserProfile>;

    fn get_user(&self, id: &UserId) -> Result<UserProfile>;

    fn list_users(&self) -> Result<Vec<UserProfile>>;
}
