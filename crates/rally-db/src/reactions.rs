use rusqlite::Connection;
use uuid::Uuid;

use rally_types::models::{ConversationId, MessageId, Reaction, ReactionId};

use crate::conversations::require_participant;
use crate::messages::query_message_row;
use crate::models::{OptionalExt, REACTION_COLUMNS, now_ts, read_reaction};
use crate::{Database, Result, StoreError};

const MAX_EMOJI_LEN: usize = 64;

/// Outcome of a reaction add/remove.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionChange {
    pub conversation_id: ConversationId,
    pub reaction: Reaction,
    /// False when the call was a no-op (reaction already present).
    pub changed: bool,
}

impl Database {
    /// Add `emoji` from `user_id` to a message. Adding the same
    /// (message, user, emoji) twice returns the existing row unchanged.
    pub fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionChange> {
        let emoji = validate_emoji(emoji)?;

        self.with_tx(|tx| {
            let conversation_id = reactable_message(tx, message_id, user_id)?;

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (message_id, user_id.to_string(), emoji, now_ts()),
            )?;

            let reaction = query_reaction_by_key(tx, message_id, user_id, emoji)?
                .ok_or_else(|| StoreError::not_found("Reaction", emoji))?;

            Ok(ReactionChange {
                conversation_id,
                reaction,
                changed: inserted == 1,
            })
        })
    }

    /// Remove a reaction by id. Users may only remove their own reactions;
    /// an id that no longer exists is a no-op.
    pub fn remove_reaction(
        &self,
        message_id: MessageId,
        reaction_id: ReactionId,
        user_id: Uuid,
    ) -> Result<Option<ReactionChange>> {
        self.with_tx(|tx| {
            let Some(reaction) = query_reaction(tx, reaction_id)? else {
                return Ok(None);
            };
            if reaction.message_id != message_id {
                return Err(StoreError::not_found("reaction", reaction_id));
            }
            if reaction.user_id != user_id {
                return Err(StoreError::forbidden("cannot remove another user's reaction"));
            }
            delete_reaction(tx, reaction).map(Some)
        })
    }

    /// Remove the caller's `emoji` reaction from a message, if present.
    pub fn remove_reaction_by_emoji(
        &self,
        message_id: MessageId,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<Option<ReactionChange>> {
        let emoji = validate_emoji(emoji)?;

        self.with_tx(|tx| {
            let Some(reaction) = query_reaction_by_key(tx, message_id, user_id, emoji)? else {
                return Ok(None);
            };
            delete_reaction(tx, reaction).map(Some)
        })
    }
}

fn validate_emoji(emoji: &str) -> Result<&str> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(StoreError::validation("emoji is required"));
    }
    if emoji.len() > MAX_EMOJI_LEN {
        return Err(StoreError::validation("emoji is too long"));
    }
    Ok(emoji)
}

/// The message's conversation, if `user_id` may react to it.
fn reactable_message(conn: &Connection, message_id: MessageId, user_id: Uuid) -> Result<ConversationId> {
    let message = query_message_row(conn, message_id)?
        .ok_or_else(|| StoreError::not_found("Message", message_id))?;
    require_participant(conn, message.conversation_id, user_id)?;
    if message.is_deleted {
        return Err(StoreError::validation("cannot react to a deleted message"));
    }
    Ok(message.conversation_id)
}

fn delete_reaction(conn: &Connection, reaction: Reaction) -> Result<ReactionChange> {
    let conversation_id: ConversationId = conn.query_row(
        "SELECT conversation_id FROM messages WHERE id = ?1",
        [reaction.message_id],
        |row| row.get(0),
    )?;
    conn.execute("DELETE FROM reactions WHERE id = ?1", [reaction.id])?;

    Ok(ReactionChange {
        conversation_id,
        reaction,
        changed: true,
    })
}

fn query_reaction(conn: &Connection, id: ReactionId) -> Result<Option<Reaction>> {
    conn.query_row(
        &format!(
            "SELECT {REACTION_COLUMNS} FROM reactions r
             LEFT JOIN users u ON u.id = r.user_id
             WHERE r.id = ?1"
        ),
        [id],
        read_reaction,
    )
    .optional()
}

fn query_reaction_by_key(
    conn: &Connection,
    message_id: MessageId,
    user_id: Uuid,
    emoji: &str,
) -> Result<Option<Reaction>> {
    conn.query_row(
        &format!(
            "SELECT {REACTION_COLUMNS} FROM reactions r
             LEFT JOIN users u ON u.id = r.user_id
             WHERE r.message_id = ?1 AND r.user_id = ?2 AND r.emoji = ?3"
        ),
        (message_id, user_id.to_string(), emoji),
        read_reaction,
    )
    .optional()
}
