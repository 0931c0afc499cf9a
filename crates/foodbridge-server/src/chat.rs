//! Chat coordinator: conversation lifecycle and message gating.
//!
//! Who may *find* whom is unrestricted ([`ChatCoordinator::directory`]).
//! Who may *message* whom is decided by the contact rule, evaluated against
//! a fresh read of the sender's active listings on every send.

use foodbridge_shared::chat::{self, Chat, Message, Participant};
use foodbridge_shared::clock::Clock;
use foodbridge_shared::contact;
use foodbridge_shared::error::{AuthorizationError, ValidationError};
use foodbridge_shared::surplus::SurplusRecord;
use foodbridge_shared::types::{ChatId, Party, Role, SurplusId, SurplusStatus, UserId};
use foodbridge_shared::CoreError;
use foodbridge_store::{ChatStore, SurplusQuery, SurplusStore, UserDirectory, UserProfile};
use serde::Serialize;
use tracing::{debug, info};

use crate::surplus::read_optional;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub chat: Chat,
    pub counterpart: Participant,
}

/// A user's visible conversations, grouped by the counterpart's role.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationList {
    pub ngos: Vec<ChatSummary>,
    pub drivers: Vec<ChatSummary>,
    pub canteens: Vec<ChatSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub chat: Chat,
    pub messages: Vec<Message>,
    pub archived: bool,
    pub can_send: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub canteens: Vec<Participant>,
    pub ngos: Vec<Participant>,
    pub drivers: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactStatus {
    pub target: Participant,
    pub authorized: bool,
    pub linked_surplus_id: Option<SurplusId>,
}

pub struct ChatCoordinator<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
}

impl<'a, S> ChatCoordinator<'a, S>
where
    S: SurplusStore + ChatStore + UserDirectory + ?Sized,
{
    pub fn new(store: &'a S, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    fn user(&self, id: &UserId) -> Result<UserProfile, CoreError> {
        self.store
            .get_user(id)
            .map_err(|e| e.into_core(format!("user {id}")))
    }

    fn chat(&self, id: ChatId) -> Result<Chat, CoreError> {
        self.store
            .get_chat(id)
            .map_err(|e| e.into_core(format!("chat {id}")))
    }

    fn active_records(&self, party: &Party) -> Result<Vec<SurplusRecord>, CoreError> {
        let query = SurplusQuery::new()
            .status(SurplusStatus::Claimed)
            .linked_to(party);
        Ok(self.store.query_surplus(&query)?)
    }

    fn linked_record(&self, chat: &Chat) -> Result<Option<SurplusRecord>, CoreError> {
        match chat.delivery_surplus_id {
            Some(id) => read_optional(self.store, id),
            None => Ok(None),
        }
    }

    /// The single chat between `a` and `b`.  An existing chat without a
    /// delivery link is stamped with `link`.
    pub fn get_or_create_conversation(
        &self,
        a: &Participant,
        b: &Participant,
        link: Option<SurplusId>,
    ) -> Result<Chat, CoreError> {
        if a.id == b.id {
            return Err(ValidationError::SelfConversation.into());
        }
        let mut chat = self
            .store
            .get_or_create_chat(a, b, link, self.clock.now())?;

        if let (None, Some(surplus_id)) = (chat.delivery_surplus_id, link) {
            if self.store.link_chat(chat.id, surplus_id)? {
                debug!(chat_id = %chat.id, surplus_id = %surplus_id, "chat linked to delivery");
            }
            chat = self.chat(chat.id)?;
        }
        Ok(chat)
    }

    /// Open (or reopen) a chat with `target_id`.  When a driver is involved
    /// the chat is linked to the delivery connecting the two.
    pub fn start_conversation(&self, me: &UserProfile, target_id: &UserId) -> Result<Chat, CoreError> {
        let target = self.user(target_id)?;
        let (mine, theirs) = (me.party(), target.party());

        let link = if mine.role == Role::Driver || theirs.role == Role::Driver {
            let records = self.active_records(&mine)?;
            contact::linking_record(&mine, &theirs, &records).map(|r| r.id)
        } else {
            None
        };

        self.get_or_create_conversation(&me.participant(), &target.participant(), link)
    }

    pub fn send_message(&self, chat_id: ChatId, sender: &Party, text: &str) -> Result<Message, CoreError> {
        let text = chat::validate_text(text)?;
        let chat = self.chat(chat_id)?;
        let counterpart = chat
            .counterpart(&sender.id)
            .ok_or(AuthorizationError::NotParticipant)?
            .party();

        let linked = self.linked_record(&chat)?;
        if chat::is_archived_for(sender.role, linked.as_ref()) {
            return Err(AuthorizationError::ChatArchived.into());
        }

        let records = self.active_records(sender)?;
        if !contact::is_authorized(sender, &counterpart, &records) {
            debug!(chat_id = %chat_id, sender = %sender.id, "send refused, no active delivery");
            return Err(AuthorizationError::RestrictedToActiveDeliveries.into());
        }

        let message = self
            .store
            .append_message(chat_id, sender, text, self.clock.now())?;
        info!(chat_id = %chat_id, sender = %sender.id, seq = message.seq, "message sent");
        Ok(message)
    }

    /// Conversations visible to `viewer`.  Drivers do not see chats whose
    /// delivery is finished.
    pub fn list_conversations(&self, viewer: &Party) -> Result<ConversationList, CoreError> {
        let mut list = ConversationList::default();
        for chat in self.store.chats_for_user(&viewer.id)? {
            let Some(counterpart) = chat.counterpart(&viewer.id).cloned() else {
                continue;
            };
            if viewer.role == Role::Driver {
                let linked = self.linked_record(&chat)?;
                if chat::is_archived_for(viewer.role, linked.as_ref()) {
                    continue;
                }
            }
            let bucket = match counterpart.role {
                Role::Ngo => &mut list.ngos,
                Role::Driver => &mut list.drivers,
                Role::Canteen => &mut list.canteens,
            };
            bucket.push(ChatSummary { chat, counterpart });
        }
        Ok(list)
    }

    /// History is always readable by participants; sending may not be.
    pub fn open_conversation(&self, chat_id: ChatId, viewer: &Party) -> Result<ConversationView, CoreError> {
        let chat = self.chat(chat_id)?;
        let counterpart = chat
            .counterpart(&viewer.id)
            .ok_or(AuthorizationError::NotParticipant)?
            .party();

        let mut messages = self.store.messages_for_chat(chat_id)?;
        chat::sort_messages(&mut messages);

        let linked = self.linked_record(&chat)?;
        let archived = chat::is_archived_for(viewer.role, linked.as_ref());
        let can_send =
            !archived && contact::is_authorized(viewer, &counterpart, &self.active_records(viewer)?);

        Ok(ConversationView {
            chat,
            messages,
            archived,
            can_send,
        })
    }

    /// Every other registered user.  Listing is not permission to message.
    pub fn directory(&self, me: &UserId) -> Result<Directory, CoreError> {
        let mut directory = Directory::default();
        for profile in self.store.list_users()? {
            if &profile.id == me {
                continue;
            }
            let entry = profile.participant();
            match profile.role {
                Role::Canteen => directory.canteens.push(entry),
                Role::Ngo => directory.ngos.push(entry),
                Role::Driver => directory.drivers.push(entry),
            }
        }
        Ok(directory)
    }

    pub fn contact_status(&self, me: &Party, target_id: &UserId) -> Result<ContactStatus, CoreError> {
        let target = self.user(target_id)?;
        let records = self.active_records(me)?;
        let linked = contact::linking_record(me, &target.party(), &records).map(|r| r.id);
        Ok(ContactStatus {
            target: target.participant(),
            authorized: linked.is_some(),
            linked_surplus_id: linked,
        })
    }
}
