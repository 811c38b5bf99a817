//! Row mapping between SQLite and the `rally-types` views.
//!
//! Text columns holding ids, enums and timestamps are parsed here, so a
//! corrupt row surfaces as a `FromSqlConversionFailure` instead of a default.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use rally_types::models::{
    Conversation, ConversationId, FileRef, MessageId, MessageKind, Participant, Reaction,
};

use crate::{Result, StoreError};

pub(crate) const CONVERSATION_COLUMNS: &str =
    "c.id, c.name, c.kind, c.avatar_url, c.last_message_id, c.created_at, c.updated_at";

pub(crate) const PARTICIPANT_COLUMNS: &str = "p.conversation_id, p.user_id, u.username, p.role, \
     p.last_read_message_id, p.last_read_at, p.notifications_enabled, p.joined_at";

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, u.username, \
     m.content, m.kind, m.file_url, m.file_name, m.reply_to_id, m.is_edited, m.is_deleted, \
     m.deleted_at, m.created_at, m.updated_at";

pub(crate) const REACTION_COLUMNS: &str =
    "r.id, r.message_id, r.user_id, u.username, r.emoji, r.created_at";

/// Current time in the storage format. Fixed-width, so text order is time order.
pub(crate) fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        // SQLite's datetime('now') has no timezone; treat it as UTC.
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|ndt| ndt.and_utc())
    })
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[derive(Debug)]
struct BadTimestamp(String);

impl std::fmt::Display for BadTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unparseable timestamp '{}'", self.0)
    }
}

impl std::error::Error for BadTimestamp {}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| conversion_error(idx, BadTimestamp(raw)))
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, BadTimestamp(raw))),
        None => Ok(None),
    }
}

pub(crate) fn read_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: enum_col(row, 2)?,
        avatar_url: row.get(3)?,
        last_message_id: row.get(4)?,
        created_at: ts_col(row, 5)?,
        updated_at: ts_col(row, 6)?,
    })
}

pub(crate) fn read_participant(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        conversation_id: row.get(0)?,
        user_id: uuid_col(row, 1)?,
        username: row.get(2)?,
        role: enum_col(row, 3)?,
        last_read_message_id: row.get(4)?,
        last_read_at: opt_ts_col(row, 5)?,
        notifications_enabled: row.get(6)?,
        joined_at: ts_col(row, 7)?,
    })
}

pub(crate) fn read_reaction(row: &Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: uuid_col(row, 2)?,
        username: row.get(3)?,
        emoji: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

/// Stored message before decryption and relation loading.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: Uuid,
    pub sender_username: Option<String>,
    /// Sealed envelope; empty for tombstones.
    pub content: String,
    pub kind: MessageKind,
    pub file: Option<FileRef>,
    pub reply_to_id: Option<MessageId>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn read_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let file_url: Option<String> = row.get(6)?;
    let file_name: Option<String> = row.get(7)?;
    let file = file_url.map(|file_url| FileRef {
        file_name: file_name.unwrap_or_default(),
        file_url,
    });

    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: uuid_col(row, 2)?,
        sender_username: row.get(3)?,
        content: row.get(4)?,
        kind: enum_col(row, 5)?,
        file,
        reply_to_id: row.get(8)?,
        is_edited: row.get(9)?,
        is_deleted: row.get(10)?,
        deleted_at: opt_ts_col(row, 11)?,
        created_at: ts_col(row, 12)?,
        updated_at: ts_col(row, 13)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }
}

/// `?1, ?2, ... ?n` for IN lists.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_parse_both_formats() {
        let stored = now_ts();
        assert!(parse_ts(&stored).is_some());
        let legacy = parse_ts("2024-03-01 12:30:00").unwrap();
        assert_eq!(legacy.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        assert!(parse_ts("yesterday").is_none());
    }

    #[test]
    fn placeholder_list() {
        assert_eq!(placeholders(3), "?1, ?2, ?3");
    }
}
