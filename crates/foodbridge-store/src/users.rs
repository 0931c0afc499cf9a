use foodbridge_shared::types::{Role, UserId};
use rusqlite::params;

use crate::database::{conversion, parse_ts, ts, Database};
use crate::error::{not_found, Result};
use crate::models::UserProfile;
use crate::repository::UserDirectory;

impl UserDirectory for Database {
    /// Insert or refresh a profile.  `created_at` of an existing row is kept.
    fn upsert_user(&self, profile: &UserProfile) -> Result<UserProfile> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, role, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 role         = excluded.role",
            params![
                profile.id.as_str(),
                profile.display_name,
                profile.role.as_str(),
                ts(&profile.created_at),
            ],
        )?;
        self.get_user(&profile.id)
    }

    fn get_user(&self, id: &UserId) -> Result<UserProfile> {
        self.conn()
            .query_row(
                "SELECT id, display_name, role, created_at FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    fn list_users(&self) -> Result<Vec<UserProfile>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name, role, created_at FROM users
             ORDER BY display_name COLLATE NOCASE, id",
        )?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let role: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(UserProfile {
        id: UserId(row.get(0)?),
        display_name: row.get(1)?,
        role: role.parse::<Role>().map_err(|e| conversion(2, e))?,
        created_at: parse_ts(3, &created_at)?,
    })
}
