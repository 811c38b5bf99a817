use std::collections::HashSet;

use rusqlite::Connection;
use uuid::Uuid;

use rally_types::models::{
    Conversation, ConversationId, ConversationKind, ConversationSummary, GroupInfo, Participant,
    ParticipantRole,
};

use crate::messages::query_messages_by_ids;
use crate::models::{
    CONVERSATION_COLUMNS, OptionalExt, PARTICIPANT_COLUMNS, enum_col, now_ts, read_conversation,
    read_participant,
};
use crate::unread::count_unread;
use crate::users::require_users;
use crate::{Database, Result, StoreError};

/// Dedup key for a direct pair, independent of argument order.
pub(crate) fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

impl Database {
    /// Return the direct conversation between `a` and `b`, creating it (and
    /// both participant rows) if it does not exist yet. The flag reports
    /// whether this call created it.
    pub fn get_or_create_direct(&self, a: Uuid, b: Uuid) -> Result<(Conversation, bool)> {
        if a == b {
            return Err(StoreError::validation("cannot start a direct chat with yourself"));
        }

        self.with_tx(|tx| {
            require_users(tx, &[a, b])?;

            let now = now_ts();
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO conversations (kind, direct_key, created_at, updated_at)
                 VALUES ('direct', ?1, ?2, ?2)",
                (direct_key(a, b), &now),
            )?;

            let id: ConversationId = tx.query_row(
                "SELECT id FROM conversations WHERE direct_key = ?1",
                [direct_key(a, b)],
                |row| row.get(0),
            )?;

            let created = inserted == 1;
            if created {
                for user in [a, b] {
                    insert_participant(tx, id, user, ParticipantRole::Member, &now)?;
                }
            }

            let conversation = query_conversation(tx, id)?
                .ok_or_else(|| StoreError::not_found("Conversation", id))?;
            Ok((conversation, created))
        })
    }

    /// Create a group owned by `owner_id`. Duplicate and self ids in
    /// `member_ids` are ignored.
    pub fn create_group(
        &self,
        owner_id: Uuid,
        name: Option<&str>,
        member_ids: &[Uuid],
    ) -> Result<GroupInfo> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StoreError::validation("group name is required"))?;

        let mut seen = HashSet::from([owner_id]);
        let members: Vec<Uuid> = member_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        self.with_tx(|tx| {
            require_users(tx, &[owner_id])?;
            require_users(tx, &members)?;

            let now = now_ts();
            tx.execute(
                "INSERT INTO conversations (name, kind, created_at, updated_at)
                 VALUES (?1, 'group', ?2, ?2)",
                (name, &now),
            )?;
            let id = tx.last_insert_rowid();

            insert_participant(tx, id, owner_id, ParticipantRole::Owner, &now)?;
            for member in &members {
                insert_participant(tx, id, *member, ParticipantRole::Member, &now)?;
            }

            let conversation = query_conversation(tx, id)?
                .ok_or_else(|| StoreError::not_found("Conversation", id))?;
            Ok(GroupInfo {
                conversation,
                participants: query_participants(tx, id)?,
            })
        })
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.with_conn(|conn| {
            query_conversation(conn, id)?.ok_or_else(|| StoreError::not_found("Conversation", id))
        })
    }

    /// Every conversation `user_id` belongs to, most recently active first,
    /// with the other participants, a decrypted preview and the unread count.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS}, p.role, p.last_read_message_id, p.notifications_enabled
                 FROM participants p
                 JOIN conversations c ON c.id = p.conversation_id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC, COALESCE(c.last_message_id, 0) DESC, c.id DESC"
            ))?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((
                        read_conversation(row)?,
                        enum_col::<ParticipantRole>(row, 7)?,
                        row.get::<_, Option<i64>>(8)?,
                        row.get::<_, bool>(9)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let preview_ids: Vec<i64> = rows.iter().filter_map(|(c, ..)| c.last_message_id).collect();
            let mut previews = query_messages_by_ids(conn, self.codec(), &preview_ids)?;

            let mut summaries = Vec::with_capacity(rows.len());
            for (conversation, my_role, cursor, notifications_enabled) in rows {
                let participants = query_participants(conn, conversation.id)?
                    .into_iter()
                    .filter(|p| p.user_id != user_id)
                    .collect();
                let last_message = conversation
                    .last_message_id
                    .and_then(|id| previews.remove(&id));
                let unread_count = count_unread(conn, conversation.id, user_id, cursor)?;

                summaries.push(ConversationSummary {
                    conversation,
                    participants,
                    last_message,
                    unread_count,
                    my_role,
                    notifications_enabled,
                });
            }

            Ok(summaries)
        })
    }

    pub fn is_participant(&self, conversation_id: ConversationId, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(participant_role(conn, conversation_id, user_id)?.is_some()))
    }

    pub fn participant_ids(&self, conversation_id: ConversationId) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| query_participant_ids(conn, conversation_id))
    }

    pub fn participants(&self, conversation_id: ConversationId) -> Result<Vec<Participant>> {
        self.with_conn(|conn| query_participants(conn, conversation_id))
    }

    /// Toggle whether `user_id` gets notified for this conversation.
    pub fn set_notifications(
        &self,
        conversation_id: ConversationId,
        user_id: Uuid,
        enabled: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            require_participant(conn, conversation_id, user_id)?;
            conn.execute(
                "UPDATE participants SET notifications_enabled = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id.to_string(), enabled),
            )?;
            Ok(())
        })
    }
}

pub(crate) fn insert_participant(
    conn: &Connection,
    conversation_id: ConversationId,
    user_id: Uuid,
    role: ParticipantRole,
    joined_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO participants (conversation_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4)",
        (conversation_id, user_id.to_string(), role.as_str(), joined_at),
    )?;
    Ok(())
}

pub(crate) fn query_conversation(
    conn: &Connection,
    id: ConversationId,
) -> Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1"),
        [id],
        read_conversation,
    )
    .optional()
}

/// Participants ordered by join time (ties by insertion order).
pub(crate) fn query_participants(
    conn: &Connection,
    conversation_id: ConversationId,
) -> Result<Vec<Participant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARTICIPANT_COLUMNS}
         FROM participants p
         LEFT JOIN users u ON u.id = p.user_id
         WHERE p.conversation_id = ?1
         ORDER BY p.joined_at ASC, p.rowid ASC"
    ))?;

    let rows = stmt
        .query_map([conversation_id], read_participant)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn query_participant_ids(
    conn: &Connection,
    conversation_id: ConversationId,
) -> Result<Vec<Uuid>> {
    Ok(query_participants(conn, conversation_id)?
        .into_iter()
        .map(|p| p.user_id)
        .collect())
}

pub(crate) fn participant_role(
    conn: &Connection,
    conversation_id: ConversationId,
    user_id: Uuid,
) -> Result<Option<ParticipantRole>> {
    conn.query_row(
        "SELECT role FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
        (conversation_id, user_id.to_string()),
        |row| enum_col(row, 0),
    )
    .optional()
}

/// NotFound if the conversation does not exist, Forbidden if `user_id` is not in it.
pub(crate) fn require_participant(
    conn: &Connection,
    conversation_id: ConversationId,
    user_id: Uuid,
) -> Result<ParticipantRole> {
    if let Some(role) = participant_role(conn, conversation_id, user_id)? {
        return Ok(role);
    }
    if query_conversation(conn, conversation_id)?.is_none() {
        return Err(StoreError::not_found("Conversation", conversation_id));
    }
    Err(StoreError::forbidden("not a participant of this conversation"))
}

pub(crate) fn require_group(conn: &Connection, conversation_id: ConversationId) -> Result<Conversation> {
    let conversation = query_conversation(conn, conversation_id)?
        .ok_or_else(|| StoreError::not_found("Conversation", conversation_id))?;
    if conversation.kind != ConversationKind::Group {
        return Err(StoreError::validation("not a group conversation"));
    }
    Ok(conversation)
}
