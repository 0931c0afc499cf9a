use chrono::{DateTime, Utc};
use foodbridge_shared::chat::{pair_key, Chat, Message, Participant};
use foodbridge_shared::types::{ChatId, Party, Role, SurplusId, UserId};
use rusqlite::{params, Transaction, TransactionBehavior};

use crate::database::{conversion, parse_ts, parse_uuid, ts, Database};
use crate::error::{not_found, Result};
use crate::messages;
use crate::repository::ChatStore;

const COLUMNS: &str = "id, a_id, a_name, a_role, b_id, b_name, b_role,
    delivery_surplus_id, created_at, updated_at";

impl ChatStore for Database {
    fn get_or_create_chat(
        &self,
        a: &Participant,
        b: &Participant,
        link: Option<SurplusId>,
        now: DateTime<Utc>,
    ) -> Result<Chat> {
        let key = pair_key(&a.id, &b.id);
        let (first, second) = if a.id <= b.id { (a, b) } else { (b, a) };

        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO chats
                 (id, pair_key, a_id, a_name, a_role, b_id, b_name, b_role,
                  delivery_surplus_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                ChatId::new().to_string(),
                key,
                first.id.as_str(),
                first.name,
                first.role.as_str(),
                second.id.as_str(),
                second.name,
                second.role.as_str(),
                link.map(|id| id.to_string()),
                ts(&now),
            ],
        )?;
        let chat = tx.query_row(
            &format!("SELECT {COLUMNS} FROM chats WHERE pair_key = ?1"),
            params![key],
            row_to_chat,
        )?;
        tx.commit()?;

        if inserted == 1 {
            tracing::info!(chat_id = %chat.id, a = %a.id, b = %b.id, "chat created");
        }
        Ok(chat)
    }

    fn get_chat(&self, id: ChatId) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM chats WHERE id = ?1"),
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(not_found)
    }

    fn link_chat(&self, id: ChatId, surplus_id: SurplusId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chats SET delivery_surplus_id = ?2
             WHERE id = ?1 AND delivery_surplus_id IS NULL",
            params![id.to_string(), surplus_id.to_string()],
        )?;
        Ok(affected == 1)
    }

    fn chats_for_user(&self, user: &UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM chats
             WHERE a_id = ?1 OR b_id = ?1
             ORDER BY updated_at DESC, id"
        ))?;
        let rows = stmt.query_map(params![user.as_str()], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    fn append_message(
        &self,
        chat_id: ChatId,
        sender: &Party,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<Message> {
        messages::append(self, chat_id, sender, text, sent_at)
    }

    fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        messages::for_chat(self, chat_id)
    }
}

fn row_to_participant(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Participant> {
    let role: String = row.get(base + 2)?;
    Ok(Participant {
        id: UserId(row.get(base)?),
        name: row.get(base + 1)?,
        role: role
            .parse::<Role>()
            .map_err(|e| conversion(base + 2, e))?,
    })
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id: String = row.get(0)?;
    let link: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(Chat {
        id: ChatId(parse_uuid(0, &id)?),
        participants: [row_to_participant(row, 1)?, row_to_participant(row, 4)?],
        delivery_surplus_id: link
            .map(|s| parse_uuid(7, &s).map(SurplusId))
            .transpose()?,
        created_at: parse_ts(8, &created_at)?,
        updated_at: parse_ts(9, &updated_at)?,
    })
}
