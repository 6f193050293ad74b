//! v001 -- Initial schema creation.
//!
//! Creates `users`, `messages` and `notifications`. User rows are owned by
//! the account collaborator, so messages and notifications reference them by
//! id without a foreign key.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (presence-relevant fields only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- opaque account id
    display_name TEXT NOT NULL,
    avatar       TEXT,
    last_seen    TEXT,                        -- RFC-3339, refreshed on connect/disconnect
    created_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    kind        TEXT NOT NULL,                -- text | image | video | audio | document
    content     TEXT NOT NULL,                -- text body or media URL
    file_name   TEXT,                         -- document only
    file_size   INTEGER,                      -- document only
    mime_type   TEXT,                         -- document only
    read        INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(receiver_id, read, sender_id);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);

-- ----------------------------------------------------------------
-- Notifications (offline fallback and account activity)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,                 -- message | login | logout | system
    title      TEXT NOT NULL,
    body       TEXT NOT NULL,
    sender_id  TEXT,
    message_id TEXT,
    read       INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user_ts
    ON notifications(user_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
