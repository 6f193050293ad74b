//! Notification Store.
//!
//! Notifications are created by the offline-delivery fallback and by
//! account-activity events. Reading or deleting one never touches the
//! message it may reference.

use rusqlite::params;

use courier_shared::{MessageId, Notification, NotificationId, NotificationKind, UserId};

use crate::convert::{parse_ts, parse_uuid, parse_with, ts};
use crate::database::Database;
use crate::error::Result;

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, kind, title, body, sender_id, message_id, read, created_at";

impl Database {
    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notifications
                (id, user_id, kind, title, body, sender_id, message_id, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                notification.id.to_string(),
                notification.user_id.as_str(),
                notification.kind.as_str(),
                notification.title,
                notification.body,
                notification.sender_id.as_ref().map(UserId::as_str),
                notification.message_id.map(|m| m.to_string()),
                notification.read,
                ts(&notification.created_at),
            ],
        )?;
        Ok(())
    }

    /// Record a login/logout/system event for `user_id`.
    pub fn record_account_activity(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        detail: &str,
    ) -> Result<Notification> {
        let title = match kind {
            NotificationKind::Login => "New sign-in",
            NotificationKind::Logout => "Signed out",
            NotificationKind::System => "System notice",
            NotificationKind::Message => "New message",
        };
        let notification = Notification::new(
            user_id.clone(),
            kind,
            title.to_string(),
            detail.to_string(),
        );
        self.insert_notification(&notification)?;
        Ok(notification)
    }

    /// Newest first.
    pub fn list_notifications(
        &self,
        user_id: &UserId,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS}
             FROM notifications
             WHERE user_id = ?1 AND (?2 = 0 OR read = 0)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![user_id.as_str(), unread_only, limit], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    pub fn unread_notification_count(&self, user_id: &UserId) -> Result<u32> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
            params![user_id.as_str()],
            |row| row.get(0),
        )?)
    }

    /// Returns `false` if no notification with that id belongs to `user_id`.
    pub fn mark_notification_read(&self, user_id: &UserId, id: NotificationId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_all_notifications_read(&self, user_id: &UserId) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
            params![user_id.as_str()],
        )?)
    }

    pub fn delete_notification(&self, user_id: &UserId, id: NotificationId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let title: String = row.get(3)?;
    let body: String = row.get(4)?;
    let sender_id: Option<String> = row.get(5)?;
    let message_id: Option<String> = row.get(6)?;
    let read: bool = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(Notification {
        id: NotificationId(parse_uuid(0, &id)?),
        user_id: parse_with(1, &user_id)?,
        kind: parse_with(2, &kind)?,
        title,
        body,
        sender_id: sender_id.map(|s| parse_with::<UserId, _>(5, &s)).transpose()?,
        message_id: message_id
            .map(|s| parse_uuid(6, &s).map(MessageId))
            .transpose()?,
        read,
        created_at: parse_ts(8, &created_at)?,
    })
}
