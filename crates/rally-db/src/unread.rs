//! Read cursors and unread counts.
//!
//! A participant's cursor (`last_read_message_id`) only moves forward. The
//! update is a single conditional UPDATE, so concurrent calls from several
//! devices of the same user cannot regress it.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use rally_types::models::{ConversationId, MessageId};

use crate::conversations::require_participant;
use crate::models::{OptionalExt, now_ts, parse_ts};
use crate::{Database, Result, StoreError};

/// Cursor movement performed by [`Database::mark_as_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAdvance {
    pub message_id: MessageId,
    pub read_at: DateTime<Utc>,
}

impl Database {
    /// Messages from other senders after the participant's cursor.
    pub fn unread_count(&self, conversation_id: ConversationId, user_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            require_participant(conn, conversation_id, user_id)?;
            let cursor: Option<MessageId> = conn.query_row(
                "SELECT last_read_message_id FROM participants
                 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id.to_string()),
                |row| row.get(0),
            )?;
            count_unread(conn, conversation_id, user_id, cursor)
        })
    }

    /// Move the cursor to `message_id` if that is strictly ahead of the
    /// stored one. Returns `None` when the cursor was already there or further.
    pub fn mark_as_read(
        &self,
        conversation_id: ConversationId,
        user_id: Uuid,
        message_id: MessageId,
    ) -> Result<Option<ReadAdvance>> {
        self.with_conn(|conn| {
            require_participant(conn, conversation_id, user_id)?;

            let in_conversation = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1 AND conversation_id = ?2",
                    (message_id, conversation_id),
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !in_conversation {
                return Err(StoreError::not_found("Message", message_id));
            }

            let read_at = now_ts();
            let changed = conn.execute(
                "UPDATE participants
                 SET last_read_message_id = ?3, last_read_at = ?4
                 WHERE conversation_id = ?1 AND user_id = ?2
                   AND (last_read_message_id IS NULL OR last_read_message_id < ?3)",
                (conversation_id, user_id.to_string(), message_id, &read_at),
            )?;

            if changed == 0 {
                return Ok(None);
            }
            let read_at = parse_ts(&read_at)
                .ok_or_else(|| StoreError::Internal(format!("bad timestamp {}", read_at)))?;
            Ok(Some(ReadAdvance { message_id, read_at }))
        })
    }
}

/// Count of messages in the conversation after `cursor` not sent by `user_id`.
/// With no cursor, every message from someone else counts. Tombstones keep
/// their position and count like any other message.
pub(crate) fn count_unread(
    conn: &Connection,
    conversation_id: ConversationId,
    user_id: Uuid,
    cursor: Option<MessageId>,
) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE conversation_id = ?1
           AND sender_id != ?2
           AND (?3 IS NULL OR id > ?3)",
        (conversation_id, user_id.to_string(), cursor),
        |row| row.get(0),
    )?;
    Ok(count)
}
