use std::collections::HashMap;

use rally_crypto::Codec;
use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use rally_types::models::{
    ConversationId, FileRef, Message, MessageId, MessageKind, MessagePage, Reaction, ReplyPreview,
};

use crate::conversations::require_participant;
use crate::models::{
    MESSAGE_COLUMNS, MessageRow, OptionalExt, REACTION_COLUMNS, now_ts, placeholders,
    read_message, read_reaction,
};
use crate::{Database, Result, StoreError};

/// Result of a delete call.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    /// The tombstone.
    pub message: Message,
    /// False when the message was already deleted; callers skip side effects.
    pub newly_deleted: bool,
    /// Attachment detached by this call, for best-effort blob removal.
    pub removed_file: Option<FileRef>,
}

impl Database {
    pub fn send_message(
        &self,
        conversation_id: ConversationId,
        sender_id: Uuid,
        content: &str,
        kind: MessageKind,
        file: Option<FileRef>,
        reply_to_id: Option<MessageId>,
    ) -> Result<Message> {
        match kind {
            MessageKind::Text if content.trim().is_empty() => {
                return Err(StoreError::validation("message content is required"));
            }
            MessageKind::Image | MessageKind::File if file.is_none() => {
                return Err(StoreError::validation("attachment is required for this message type"));
            }
            _ => {}
        }

        let sealed = self
            .codec()
            .seal(content)
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        self.with_tx(|tx| {
            require_participant(tx, conversation_id, sender_id)?;

            if let Some(reply_id) = reply_to_id {
                let target = query_message_row(tx, reply_id)?;
                if target.map(|m| m.conversation_id) != Some(conversation_id) {
                    return Err(StoreError::validation(
                        "reply target must be a message in the same conversation",
                    ));
                }
            }

            let now = now_ts();
            let (file_url, file_name) = match &file {
                Some(f) => (Some(f.file_url.as_str()), Some(f.file_name.as_str())),
                None => (None, None),
            };
            tx.execute(
                "INSERT INTO messages
                    (conversation_id, sender_id, content, kind, file_url, file_name, reply_to_id,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    conversation_id,
                    sender_id.to_string(),
                    sealed,
                    kind.as_str(),
                    file_url,
                    file_name,
                    reply_to_id,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE conversations SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
                (conversation_id, id, &now),
            )?;

            load_message(tx, self.codec(), id)
        })
    }

    /// One page of history for a participant. Page 1 holds the newest
    /// messages; each page is returned oldest first.
    pub fn get_messages(
        &self,
        conversation_id: ConversationId,
        user_id: Uuid,
        page: u32,
    ) -> Result<MessagePage> {
        let page = page.max(1);
        let page_size = self.page_size();

        self.with_conn(|conn| {
            require_participant(conn, conversation_id, user_id)?;

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;

            let offset = i64::from(page - 1) * i64::from(page_size);
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let mut rows = stmt
                .query_map((conversation_id, page_size, offset), read_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();

            Ok(MessagePage {
                messages: hydrate(conn, self.codec(), rows)?,
                page,
                page_size,
                total,
                has_more: offset + i64::from(page_size) < total,
            })
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.with_conn(|conn| load_message(conn, self.codec(), id))
    }

    /// Replace the content of a message. Only its sender may edit; id,
    /// sender, position and `created_at` are unchanged.
    pub fn edit_message(&self, id: MessageId, user_id: Uuid, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(StoreError::validation("message content is required"));
        }
        let sealed = self
            .codec()
            .seal(content)
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        self.with_tx(|tx| {
            let row = query_message_row(tx, id)?.ok_or_else(|| StoreError::not_found("Message", id))?;
            if row.sender_id != user_id {
                return Err(StoreError::forbidden("only the sender can edit a message"));
            }
            if row.is_deleted {
                return Err(StoreError::validation("a deleted message cannot be edited"));
            }

            tx.execute(
                "UPDATE messages SET content = ?2, is_edited = 1, updated_at = ?3 WHERE id = ?1",
                (id, sealed, now_ts()),
            )?;

            load_message(tx, self.codec(), id)
        })
    }

    /// Turn a message into a tombstone. Repeating the call is a no-op that
    /// reports `newly_deleted == false`.
    pub fn delete_message(&self, id: MessageId, user_id: Uuid) -> Result<DeleteOutcome> {
        self.with_tx(|tx| {
            let row = query_message_row(tx, id)?.ok_or_else(|| StoreError::not_found("Message", id))?;
            if row.sender_id != user_id {
                return Err(StoreError::forbidden("only the sender can delete a message"));
            }

            if row.is_deleted {
                return Ok(DeleteOutcome {
                    message: load_message(tx, self.codec(), id)?,
                    newly_deleted: false,
                    removed_file: None,
                });
            }

            let now = now_ts();
            tx.execute(
                "UPDATE messages
                 SET is_deleted = 1, deleted_at = ?2, content = '', file_url = NULL,
                     file_name = NULL, updated_at = ?2
                 WHERE id = ?1",
                (id, &now),
            )?;

            Ok(DeleteOutcome {
                message: load_message(tx, self.codec(), id)?,
                newly_deleted: true,
                removed_file: row.file,
            })
        })
    }
}

/// Decrypt stored content. Tombstones are empty; undecryptable content is
/// logged and shown empty rather than failing the whole listing.
pub(crate) fn reveal(codec: &Codec, id: MessageId, content: &str, is_deleted: bool) -> String {
    if is_deleted || content.is_empty() {
        return String::new();
    }
    codec.open(content).unwrap_or_else(|e| {
        warn!("Undecryptable content on message {}: {}", id, e);
        String::new()
    })
}

pub(crate) fn query_message_row(conn: &Connection, id: MessageId) -> Result<Option<MessageRow>> {
    conn.query_row(
        &format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             LEFT JOIN users u ON u.id = m.sender_id
             WHERE m.id = ?1"
        ),
        [id],
        read_message,
    )
    .optional()
}

pub(crate) fn load_message(conn: &Connection, codec: &Codec, id: MessageId) -> Result<Message> {
    let row = query_message_row(conn, id)?.ok_or_else(|| StoreError::not_found("Message", id))?;
    hydrate(conn, codec, vec![row])?
        .pop()
        .ok_or_else(|| StoreError::not_found("Message", id))
}

fn query_message_rows(conn: &Connection, ids: &[MessageId]) -> Result<Vec<MessageRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         LEFT JOIN users u ON u.id = m.sender_id
         WHERE m.id IN ({})",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids), read_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn query_messages_by_ids(
    conn: &Connection,
    codec: &Codec,
    ids: &[MessageId],
) -> Result<HashMap<MessageId, Message>> {
    let rows = query_message_rows(conn, ids)?;
    Ok(hydrate(conn, codec, rows)?
        .into_iter()
        .map(|m| (m.id, m))
        .collect())
}

/// Batch-fetch reactions for a set of message ids, oldest first.
pub(crate) fn query_reactions_for_messages(
    conn: &Connection,
    ids: &[MessageId],
) -> Result<Vec<Reaction>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {REACTION_COLUMNS}
         FROM reactions r
         LEFT JOIN users u ON u.id = r.user_id
         WHERE r.message_id IN ({})
         ORDER BY r.id ASC",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids), read_reaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Decrypt rows and attach reactions and reply previews, keeping row order.
pub(crate) fn hydrate(conn: &Connection, codec: &Codec, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    let ids: Vec<MessageId> = rows.iter().map(|r| r.id).collect();
    let mut reactions: HashMap<MessageId, Vec<Reaction>> = HashMap::new();
    for reaction in query_reactions_for_messages(conn, &ids)? {
        reactions.entry(reaction.message_id).or_default().push(reaction);
    }

    let reply_ids: Vec<MessageId> = rows.iter().filter_map(|r| r.reply_to_id).collect();
    let replies: HashMap<MessageId, ReplyPreview> = query_message_rows(conn, &reply_ids)?
        .into_iter()
        .map(|r| {
            let preview = ReplyPreview {
                id: r.id,
                sender_id: r.sender_id,
                sender_username: r.sender_username,
                content: reveal(codec, r.id, &r.content, r.is_deleted),
                is_deleted: r.is_deleted,
            };
            (r.id, preview)
        })
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| Message {
            content: reveal(codec, row.id, &row.content, row.is_deleted),
            reactions: reactions.remove(&row.id).unwrap_or_default(),
            reply_to: row.reply_to_id.and_then(|id| replies.get(&id).cloned()),
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            sender_username: row.sender_username,
            kind: row.kind,
            file: row.file,
            is_edited: row.is_edited,
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .collect())
}
