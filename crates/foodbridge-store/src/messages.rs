//! Append-only chat messages.  `seq` is the SQLite rowid and breaks ties
//! between messages carrying the same timestamp.

use chrono::{DateTime, Utc};
use foodbridge_shared::chat::Message;
use foodbridge_shared::types::{ChatId, MessageId, Party, Role, UserId};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

use crate::database::{conversion, parse_ts, parse_uuid, ts, Database};
use crate::error::{Result, StoreError};

impl Database {
    fn chat_exists(&self, chat_id: ChatId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM chats WHERE id = ?1",
                params![chat_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

pub(crate) fn append(
    db: &Database,
    chat_id: ChatId,
    sender: &Party,
    text: &str,
    sent_at: DateTime<Utc>,
) -> Result<Message> {
    if !db.chat_exists(chat_id)? {
        return Err(StoreError::NotFound);
    }

    let id = MessageId::new();
    let tx = Transaction::new_unchecked(db.conn(), TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO messages (id, chat_id, sender_id, sender_role, text, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.0.to_string(),
            chat_id.to_string(),
            sender.id.as_str(),
            sender.role.as_str(),
            text,
            ts(&sent_at),
        ],
    )?;
    let seq = tx.last_insert_rowid();
    tx.execute(
        "UPDATE chats SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
        params![chat_id.to_string(), ts(&sent_at)],
    )?;
    tx.commit()?;

    Ok(Message {
        id,
        chat_id,
        seq,
        sender_id: sender.id.clone(),
        sender_role: sender.role,
        text: text.to_string(),
        sent_at,
    })
}

pub(crate) fn for_chat(db: &Database, chat_id: ChatId) -> Result<Vec<Message>> {
    let mut stmt = db.conn().prepare(
        "SELECT seq, id, chat_id, sender_id, sender_role, text, sent_at
         FROM messages
         WHERE chat_id = ?1
         ORDER BY sent_at ASC, seq ASC",
    )?;
    let rows = stmt.query_map(params![chat_id.to_string()], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(1)?;
    let chat_id: String = row.get(2)?;
    let role: String = row.get(4)?;
    let sent_at: String = row.get(6)?;

    Ok(Message {
        id: MessageId(parse_uuid(1, &id)?),
        chat_id: ChatId(parse_uuid(2, &chat_id)?),
        seq: row.get(0)?,
        sender_id: UserId(row.get(3)?),
        sender_role: role.parse::<Role>().map_err(|e| conversion(4, e))?,
        text: row.get(5)?,
        sent_at: parse_ts(6, &sent_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use foodbridge_shared::chat::Participant;

    use super::*;
    use crate::repository::ChatStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn chat(db: &Database) -> foodbridge_shared::chat::Chat {
        let ngo = Participant {
            id: UserId::from("n1"),
            name: "Helping Hands".into(),
            role: Role::Ngo,
        };
        let canteen = Participant {
            id: UserId::from("c1"),
            name: "Main Canteen".into(),
            role: Role::Canteen,
        };
        db.get_or_create_chat(&ngo, &canteen, None, t0()).unwrap()
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let chat = chat(&db);
        let ngo = Party::new("n1", Role::Ngo);
        let canteen = Party::new("c1", Role::Canteen);

        db.append_message(chat.id, &ngo, "later", t0() + Duration::seconds(3))
            .unwrap();
        db.append_message(chat.id, &canteen, "first", t0()).unwrap();
        db.append_message(chat.id, &ngo, "second", t0()).unwrap();

        let texts: Vec<String> = db
            .messages_for_chat(chat.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["first", "second", "later"]);
    }

    #[test]
    fn append_bumps_chat_activity() {
        let db = Database::open_in_memory().unwrap();
        let chat = chat(&db);
        let at = t0() + Duration::minutes(10);
        let msg = db
            .append_message(chat.id, &Party::new("c1", Role::Canteen), "on my way", at)
            .unwrap();
        assert!(msg.seq > 0);
        assert_eq!(db.get_chat(chat.id).unwrap().updated_at, at);

        // An older timestamp never moves activity backwards.
        db.append_message(chat.id, &Party::new("n1", Role::Ngo), "ok", t0())
            .unwrap();
        assert_eq!(db.get_chat(chat.id).unwrap().updated_at, at);
    }

    #[test]
    fn append_to_missing_chat() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .append_message(ChatId::new(), &Party::new("n1", Role::Ngo), "hi", t0())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
