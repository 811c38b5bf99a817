use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT,
            kind            TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            avatar_url      TEXT,
            -- '<lower uuid>:<higher uuid>' for direct chats, NULL for groups
            direct_key      TEXT UNIQUE,
            last_message_id INTEGER,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations(updated_at);

        CREATE TABLE IF NOT EXISTS participants (
            conversation_id       INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id               TEXT NOT NULL REFERENCES users(id),
            role                  TEXT NOT NULL CHECK (role IN ('owner', 'admin', 'member')),
            last_read_message_id  INTEGER,
            last_read_at          TEXT,
            notifications_enabled INTEGER NOT NULL DEFAULT 1,
            joined_at             TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON participants(user_id);

        -- AUTOINCREMENT: ids are never reused, so id order is send order
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            kind            TEXT NOT NULL CHECK (kind IN ('text', 'image', 'file')),
            file_url        TEXT,
            file_name       TEXT,
            reply_to_id     INTEGER REFERENCES messages(id) ON DELETE SET NULL,
            is_edited       INTEGER NOT NULL DEFAULT 0,
            is_deleted      INTEGER NOT NULL DEFAULT 0,
            deleted_at      TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);

        CREATE TABLE IF NOT EXISTS reactions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
