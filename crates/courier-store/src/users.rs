use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use courier_shared::{User, UserId};

use crate::convert::{parse_ts, parse_with, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};

const USER_COLUMNS: &str = "id, display_name, avatar, last_seen, created_at";

impl Database {
    /// Insert a user or update the display fields of an existing one.
    /// `created_at` and `last_seen` of an existing row are preserved.
    pub fn upsert_user(&self, id: &UserId, display_name: &str, avatar: Option<&str>) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar, last_seen, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar = excluded.avatar",
            params![id.as_str(), display_name, avatar, ts(&Utc::now())],
        )?;
        self.get_user(id)
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .map_err(StoreError::from_query)
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .optional()?)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY display_name COLLATE NOCASE, id"
        ))?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Refresh the persisted last-seen timestamp. Returns `false` if the
    /// user row does not exist.
    pub fn touch_last_seen(&self, id: &UserId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            params![ts(&at), id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let avatar: Option<String> = row.get(2)?;
    let last_seen: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(User {
        id: parse_with(0, &id)?,
        display_name,
        avatar,
        last_seen: last_seen.map(|s| parse_ts(3, &s)).transpose()?,
        created_at: parse_ts(4, &created_at)?,
    })
}
