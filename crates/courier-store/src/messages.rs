//! Message Store.
//!
//! Messages are append-only apart from the `read` flag and `updated_at`.
//! Unread counts are always derived from this table; there is no stored
//! counter to keep in sync.

use chrono::{DateTime, Utc};
use rusqlite::params;

use courier_shared::{
    DocumentDescriptor, MediaRef, Message, MessageBody, MessageId, MessageKind, UnreadCounts,
    UserId,
};

use crate::convert::{parse_ts, parse_uuid, parse_with, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, kind, content, file_name, file_size, \
                               mime_type, read, created_at, updated_at";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let (content, file_name, file_size, mime_type) = match &message.body {
            MessageBody::Text(text) => (text.as_str(), None, None, None),
            MessageBody::Image(m) | MessageBody::Video(m) | MessageBody::Audio(m) => {
                (m.url.as_str(), None, None, None)
            }
            MessageBody::Document(d) => (
                d.url.as_str(),
                Some(d.file_name.as_str()),
                Some(i64::try_from(d.size_bytes).unwrap_or(i64::MAX)),
                d.mime_type.as_deref(),
            ),
        };

        self.conn().execute(
            "INSERT INTO messages
                (id, sender_id, receiver_id, kind, content, file_name, file_size, mime_type,
                 read, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id.to_string(),
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.body.kind().as_str(),
                content,
                file_name,
                file_size,
                mime_type,
                message.read,
                ts(&message.created_at),
                ts(&message.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::from_query)
    }

    /// Messages exchanged between `a` and `b`, oldest first.
    ///
    /// Returns the most recent `limit` messages created strictly before
    /// `before` (or the latest page when `before` is `None`).
    pub fn conversation(
        &self,
        a: &UserId,
        b: &UserId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let before = before.map(|t| ts(&t));
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
               AND (?3 IS NULL OR created_at < ?3)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?4"
        ))?;

        let rows = stmt.query_map(
            params![a.as_str(), b.as_str(), before, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Unread messages addressed to `me`, grouped by sender.
    pub fn unread_counts(&self, me: &UserId) -> Result<UnreadCounts> {
        let mut stmt = self.conn().prepare(
            "SELECT sender_id, COUNT(*)
             FROM messages
             WHERE receiver_id = ?1 AND read = 0
             GROUP BY sender_id",
        )?;

        let rows = stmt.query_map(params![me.as_str()], |row| {
            let sender: String = row.get(0)?;
            let count: u32 = row.get(1)?;
            Ok((parse_with::<UserId, _>(0, &sender)?, count))
        })?;

        let mut counts = UnreadCounts::new();
        for row in rows {
            let (sender, count) = row?;
            counts.insert(sender, count);
        }
        Ok(counts)
    }

    /// Flip every unread message from `counterpart` to `me` to read, stamping
    /// `updated_at = at`, and return exactly the ids that transitioned.
    ///
    /// Selection and update share one transaction, so a concurrent insert
    /// can never be reported as seen without also being marked read.
    pub fn mark_conversation_read(
        &mut self,
        me: &UserId,
        counterpart: &UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        let tx = self.conn_mut().transaction()?;

        let ids = {
            let mut stmt = tx.prepare(
                "SELECT id FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![counterpart.as_str(), me.as_str()], |row| {
                let id: String = row.get(0)?;
                parse_uuid(0, &id).map(MessageId)
            })?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        let updated = tx.execute(
            "UPDATE messages SET read = 1, updated_at = ?1
             WHERE sender_id = ?2 AND receiver_id = ?3 AND read = 0",
            params![ts(&at), counterpart.as_str(), me.as_str()],
        )?;

        if updated != ids.len() {
            return Err(StoreError::Corrupt(format!(
                "mark-as-read selected {} rows but updated {updated}",
                ids.len()
            )));
        }

        tx.commit()?;
        Ok(ids)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let sender_id: String = row.get(1)?;
    let receiver_id: String = row.get(2)?;
    let kind: String = row.get(3)?;
    let content: String = row.get(4)?;
    let file_name: Option<String> = row.get(5)?;
    let file_size: Option<i64> = row.get(6)?;
    let mime_type: Option<String> = row.get(7)?;
    let read: bool = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    let body = match parse_with::<MessageKind, _>(3, &kind)? {
        MessageKind::Text => MessageBody::Text(content),
        MessageKind::Image => MessageBody::Image(MediaRef { url: content }),
        MessageKind::Video => MessageBody::Video(MediaRef { url: content }),
        MessageKind::Audio => MessageBody::Audio(MediaRef { url: content }),
        MessageKind::Document => MessageBody::Document(DocumentDescriptor {
            url: content,
            file_name: file_name.unwrap_or_default(),
            size_bytes: file_size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
            mime_type,
        }),
    };

    Ok(Message {
        id: MessageId(parse_uuid(0, &id)?),
        sender_id: parse_with(1, &sender_id)?,
        receiver_id: parse_with(2, &receiver_id)?,
        body,
        read,
        created_at: parse_ts(9, &created_at)?,
        updated_at: parse_ts(10, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn text(from: &UserId, to: &UserId, body: &str) -> Message {
        Message::new(from.clone(), to.clone(), MessageBody::Text(body.into()))
    }

    #[test]
    fn insert_and_fetch_every_body_kind() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (uid("a"), uid("b"));

        let bodies = vec![
            MessageBody::Text("hi".into()),
            MessageBody::Image(MediaRef { url: "https://cdn/i.png".into() }),
            MessageBody::Video(MediaRef { url: "https://cdn/v.mp4".into() }),
            MessageBody::Audio(MediaRef { url: "https://cdn/a.ogg".into() }),
            MessageBody::Document(DocumentDescriptor {
                url: "https://cdn/d.pdf".into(),
                file_name: "d.pdf".into(),
                size_bytes: 2048,
                mime_type: Some("application/pdf".into()),
            }),
        ];

        for body in bodies {
            let msg = Message::new(a.clone(), b.clone(), body);
            db.insert_message(&msg).unwrap();
            let stored = db.get_message(msg.id).unwrap();
            assert_eq!(stored.body, msg.body);
            assert!(!stored.read);
        }
    }

    #[test]
    fn missing_message_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_message(MessageId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn conversation_is_ordered_and_scoped_to_the_pair() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (uid("a"), uid("b"), uid("c"));

        let base = Utc::now();
        for (i, (from, to)) in [(&a, &b), (&b, &a), (&a, &c), (&a, &b)].iter().enumerate() {
            let mut msg = text(from, to, &format!("m{i}"));
            msg.created_at = base + Duration::milliseconds(i as i64);
            msg.updated_at = msg.created_at;
            db.insert_message(&msg).unwrap();
        }

        let convo = db.conversation(&a, &b, 50, None).unwrap();
        let bodies: Vec<_> = convo
            .iter()
            .map(|m| match &m.body {
                MessageBody::Text(t) => t.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(bodies, vec!["m0", "m1", "m3"]);

        // Same view from the other side.
        assert_eq!(db.conversation(&b, &a, 50, None).unwrap(), convo);

        // Paging returns the latest page, oldest first.
        let page = db.conversation(&a, &b, 2, None).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].id, convo[2].id);

        let older = db
            .conversation(&a, &b, 50, Some(convo[1].created_at))
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, convo[0].id);
    }

    #[test]
    fn unread_counts_match_unread_rows() {
        let db = Database::open_in_memory().unwrap();
        let (me, a, b) = (uid("me"), uid("a"), uid("b"));

        for _ in 0..3 {
            db.insert_message(&text(&a, &me, "x")).unwrap();
        }
        db.insert_message(&text(&b, &me, "y")).unwrap();
        db.insert_message(&text(&me, &a, "outgoing")).unwrap();

        let counts = db.unread_counts(&me).unwrap();
        assert_eq!(counts.get(&a), Some(&3));
        assert_eq!(counts.get(&b), Some(&1));
        assert_eq!(counts.len(), 2);

        let theirs = db.unread_counts(&a).unwrap();
        assert_eq!(theirs.get(&me), Some(&1));
    }

    #[test]
    fn mark_read_is_idempotent_and_scoped() {
        let mut db = Database::open_in_memory().unwrap();
        let (me, a, b) = (uid("me"), uid("a"), uid("b"));

        let m1 = text(&a, &me, "1");
        let m2 = text(&a, &me, "2");
        let other = text(&b, &me, "3");
        let outgoing = text(&me, &a, "4");
        for m in [&m1, &m2, &other, &outgoing] {
            db.insert_message(m).unwrap();
        }

        let at = Utc::now() + Duration::seconds(5);
        let first = db.mark_conversation_read(&me, &a, at).unwrap();
        assert_eq!(first, vec![m1.id, m2.id]);

        let stored = db.get_message(m1.id).unwrap();
        assert!(stored.read);
        assert_eq!(stored.updated_at.timestamp_micros(), at.timestamp_micros());
        assert_eq!(stored.created_at.timestamp_micros(), m1.created_at.timestamp_micros());

        let second = db.mark_conversation_read(&me, &a, Utc::now()).unwrap();
        assert!(second.is_empty());

        // Untouched: other sender, and my own outgoing message.
        assert!(!db.get_message(other.id).unwrap().read);
        assert!(!db.get_message(outgoing.id).unwrap().read);

        let counts = db.unread_counts(&me).unwrap();
        assert_eq!(counts.get(&a), None);
        assert_eq!(counts.get(&b), Some(&1));
    }
}
