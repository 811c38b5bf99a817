use std::collections::HashSet;

use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use rally_types::models::{
    Conversation, ConversationId, FileRef, GroupInfo, Participant, ParticipantRole,
};

use crate::conversations::{
    insert_participant, participant_role, query_conversation, query_participant_ids,
    query_participants, require_group, require_participant,
};
use crate::models::{OptionalExt, now_ts, uuid_col};
use crate::permissions::{GroupAction, authorize};
use crate::users::require_users;
use crate::{Database, Result, StoreError};

/// What a group deletion removed, for fan-out and blob cleanup.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedGroup {
    pub participant_ids: Vec<Uuid>,
    pub files: Vec<FileRef>,
}

impl Database {
    /// Group details for a participant. If no participant holds `owner`
    /// (legacy rows), the earliest-joined one is promoted before returning.
    pub fn get_group_info(&self, conversation_id: ConversationId, user_id: Uuid) -> Result<GroupInfo> {
        self.with_tx(|tx| {
            let conversation = require_group(tx, conversation_id)?;
            require_participant(tx, conversation_id, user_id)?;
            repair_owner(tx, conversation_id)?;

            Ok(GroupInfo {
                conversation,
                participants: query_participants(tx, conversation_id)?,
            })
        })
    }

    /// Add users as members. Ids already in the group are skipped; the
    /// newly created participants are returned.
    pub fn add_members(
        &self,
        conversation_id: ConversationId,
        actor_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<Participant>> {
        if user_ids.is_empty() {
            return Err(StoreError::validation("no users to add"));
        }

        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            let actor = require_participant(tx, conversation_id, actor_id)?;
            authorize(actor, GroupAction::AddMember)?;
            require_users(tx, user_ids)?;

            let existing: HashSet<Uuid> = query_participant_ids(tx, conversation_id)?.into_iter().collect();
            let mut seen = HashSet::new();
            let now = now_ts();
            let mut added = Vec::new();
            for id in user_ids {
                if existing.contains(id) || !seen.insert(*id) {
                    continue;
                }
                insert_participant(tx, conversation_id, *id, ParticipantRole::Member, &now)?;
                added.push(*id);
            }

            Ok(query_participants(tx, conversation_id)?
                .into_iter()
                .filter(|p| added.contains(&p.user_id))
                .collect())
        })
    }

    pub fn remove_member(
        &self,
        conversation_id: ConversationId,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<()> {
        if actor_id == target_id {
            return Err(StoreError::validation("use leave to remove yourself"));
        }

        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            let actor = require_participant(tx, conversation_id, actor_id)?;
            let target = participant_role(tx, conversation_id, target_id)?
                .ok_or_else(|| StoreError::not_found("Participant", target_id))?;
            authorize(actor, GroupAction::RemoveMember { target })?;

            delete_participant(tx, conversation_id, target_id)?;
            info!("{} removed {} from group {}", actor_id, target_id, conversation_id);
            Ok(())
        })
    }

    pub fn leave_group(&self, conversation_id: ConversationId, user_id: Uuid) -> Result<()> {
        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            let role = require_participant(tx, conversation_id, user_id)?;
            authorize(role, GroupAction::Leave)?;

            delete_participant(tx, conversation_id, user_id)?;
            info!("{} left group {}", user_id, conversation_id);
            Ok(())
        })
    }

    /// Promote or demote between member and admin. Returns the participant
    /// and whether the role actually changed.
    pub fn update_role(
        &self,
        conversation_id: ConversationId,
        actor_id: Uuid,
        target_id: Uuid,
        new_role: ParticipantRole,
    ) -> Result<(Participant, bool)> {
        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            let actor = require_participant(tx, conversation_id, actor_id)?;
            let target = participant_role(tx, conversation_id, target_id)?
                .ok_or_else(|| StoreError::not_found("Participant", target_id))?;
            authorize(actor, GroupAction::ChangeRole { target, new_role })?;

            let changed = target != new_role;
            if changed {
                set_role(tx, conversation_id, target_id, new_role)?;
            }

            let participant = query_participants(tx, conversation_id)?
                .into_iter()
                .find(|p| p.user_id == target_id)
                .ok_or_else(|| StoreError::not_found("Participant", target_id))?;
            Ok((participant, changed))
        })
    }

    /// Hand the owner role to `target_id`; the current owner becomes admin.
    /// Both rows change in one transaction or neither does.
    pub fn transfer_ownership(
        &self,
        conversation_id: ConversationId,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<()> {
        if actor_id == target_id {
            return Err(StoreError::validation("already the owner"));
        }

        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            let actor = require_participant(tx, conversation_id, actor_id)?;
            authorize(actor, GroupAction::TransferOwnership)?;
            participant_role(tx, conversation_id, target_id)?
                .ok_or_else(|| StoreError::not_found("Participant", target_id))?;

            set_role(tx, conversation_id, actor_id, ParticipantRole::Admin)?;
            set_role(tx, conversation_id, target_id, ParticipantRole::Owner)?;

            info!(
                "Ownership of group {} transferred from {} to {}",
                conversation_id, actor_id, target_id
            );
            Ok(())
        })
    }

    /// Delete a group with its messages, reactions and participants.
    pub fn delete_group(&self, conversation_id: ConversationId, actor_id: Uuid) -> Result<DeletedGroup> {
        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            let actor = require_participant(tx, conversation_id, actor_id)?;
            authorize(actor, GroupAction::DeleteGroup)?;

            let participant_ids = query_participant_ids(tx, conversation_id)?;
            let files = query_attachments(tx, conversation_id)?;

            tx.execute(
                "DELETE FROM reactions
                 WHERE message_id IN (SELECT id FROM messages WHERE conversation_id = ?1)",
                [conversation_id],
            )?;
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [conversation_id])?;
            tx.execute("DELETE FROM participants WHERE conversation_id = ?1", [conversation_id])?;
            tx.execute("DELETE FROM conversations WHERE id = ?1", [conversation_id])?;

            info!("Group {} deleted by {}", conversation_id, actor_id);
            Ok(DeletedGroup { participant_ids, files })
        })
    }

    /// Rename and/or change the avatar. An empty avatar clears it.
    pub fn update_group(
        &self,
        conversation_id: ConversationId,
        actor_id: Uuid,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Conversation> {
        if name.is_none() && avatar_url.is_none() {
            return Err(StoreError::validation("nothing to update"));
        }
        let name = match name.map(str::trim) {
            Some("") => return Err(StoreError::validation("group name cannot be empty")),
            other => other,
        };

        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            let actor = require_participant(tx, conversation_id, actor_id)?;
            authorize(actor, GroupAction::UpdateGroup)?;

            let now = now_ts();
            if let Some(name) = name {
                tx.execute(
                    "UPDATE conversations SET name = ?2, updated_at = ?3 WHERE id = ?1",
                    (conversation_id, name, &now),
                )?;
            }
            if let Some(avatar) = avatar_url {
                let avatar = Some(avatar.trim()).filter(|a| !a.is_empty());
                tx.execute(
                    "UPDATE conversations SET avatar_url = ?2, updated_at = ?3 WHERE id = ?1",
                    (conversation_id, avatar, &now),
                )?;
            }

            query_conversation(tx, conversation_id)?
                .ok_or_else(|| StoreError::not_found("Conversation", conversation_id))
        })
    }
}

fn set_role(
    conn: &Connection,
    conversation_id: ConversationId,
    user_id: Uuid,
    role: ParticipantRole,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE participants SET role = ?3 WHERE conversation_id = ?1 AND user_id = ?2",
        (conversation_id, user_id.to_string(), role.as_str()),
    )?;
    if changed != 1 {
        return Err(StoreError::not_found("Participant", user_id));
    }
    Ok(())
}

fn delete_participant(conn: &Connection, conversation_id: ConversationId, user_id: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
        (conversation_id, user_id.to_string()),
    )?;
    Ok(())
}

fn query_attachments(conn: &Connection, conversation_id: ConversationId) -> Result<Vec<FileRef>> {
    let mut stmt = conn.prepare(
        "SELECT file_url, COALESCE(file_name, '') FROM messages
         WHERE conversation_id = ?1 AND file_url IS NOT NULL",
    )?;
    let files = stmt
        .query_map([conversation_id], |row| {
            Ok(FileRef {
                file_url: row.get(0)?,
                file_name: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

/// Promote the earliest-joined participant if the group has no owner.
/// Returns the promoted user, if any.
fn repair_owner(conn: &Connection, conversation_id: ConversationId) -> Result<Option<Uuid>> {
    let has_owner = conn
        .prepare_cached(
            "SELECT 1 FROM participants WHERE conversation_id = ?1 AND role = 'owner'",
        )?
        .exists([conversation_id])?;
    if has_owner {
        return Ok(None);
    }

    let earliest = conn
        .query_row(
            "SELECT user_id FROM participants WHERE conversation_id = ?1
             ORDER BY joined_at ASC, rowid ASC LIMIT 1",
            [conversation_id],
            |row| uuid_col(row, 0),
        )
        .optional()?;

    if let Some(user_id) = earliest {
        set_role(conn, conversation_id, user_id, ParticipantRole::Owner)?;
        warn!(
            "Group {} had no owner; promoted earliest member {}",
            conversation_id, user_id
        );
    }
    Ok(earliest)
}

#[cfg(test)]
mod tests {
    use rally_types::models::MessageKind;

    use super::*;
    use crate::testing::{db, user};

    struct Group {
        db: Database,
        id: ConversationId,
        owner: Uuid,
        admin: Uuid,
        member: Uuid,
    }

    fn group() -> Group {
        let db = db();
        let owner = user(&db, "olga");
        let admin = user(&db, "xavi");
        let member = user(&db, "yuri");
        let id = db
            .create_group(owner, Some("rota"), &[admin, member])
            .unwrap()
            .conversation
            .id;
        db.update_role(id, owner, admin, ParticipantRole::Admin).unwrap();
        Group { db, id, owner, admin, member }
    }

    fn role_of(g: &Group, user_id: Uuid) -> Option<ParticipantRole> {
        g.db.participants(g.id)
            .unwrap()
            .into_iter()
            .find(|p| p.user_id == user_id)
            .map(|p| p.role)
    }

    fn owner_count(db: &Database, id: ConversationId) -> usize {
        db.participants(id)
            .unwrap()
            .iter()
            .filter(|p| p.role == ParticipantRole::Owner)
            .count()
    }

    #[test]
    fn transfer_then_former_owner_cannot_delete() {
        let g = group();
        g.db.transfer_ownership(g.id, g.owner, g.admin).unwrap();

        assert_eq!(role_of(&g, g.admin), Some(ParticipantRole::Owner));
        assert_eq!(role_of(&g, g.owner), Some(ParticipantRole::Admin));
        assert_eq!(role_of(&g, g.member), Some(ParticipantRole::Member));

        assert!(matches!(g.db.delete_group(g.id, g.owner), Err(StoreError::Forbidden(_))));
        assert_eq!(owner_count(&g.db, g.id), 1);
    }

    #[test]
    fn transfer_to_outsider_changes_nothing() {
        let g = group();
        let outsider = user(&g.db, "eve");
        assert!(matches!(
            g.db.transfer_ownership(g.id, g.owner, outsider),
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(role_of(&g, g.owner), Some(ParticipantRole::Owner));
        assert!(matches!(
            g.db.transfer_ownership(g.id, g.admin, g.member),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn admin_can_add_and_kick_members_but_not_admins() {
        let g = group();
        let zoe = user(&g.db, "zoe");

        let added = g.db.add_members(g.id, g.admin, &[zoe, zoe, g.member]).unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].user_id, zoe);
        assert_eq!(added[0].role, ParticipantRole::Member);

        assert!(matches!(g.db.add_members(g.id, zoe, &[g.owner]), Err(StoreError::Forbidden(_))));

        g.db.remove_member(g.id, g.admin, zoe).unwrap();
        assert_eq!(role_of(&g, zoe), None);

        g.db.update_role(g.id, g.owner, g.member, ParticipantRole::Admin).unwrap();
        assert!(matches!(
            g.db.remove_member(g.id, g.admin, g.member),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            g.db.remove_member(g.id, g.admin, g.owner),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn role_changes_are_owner_only_and_never_mint_owners() {
        let g = group();
        assert!(matches!(
            g.db.update_role(g.id, g.admin, g.member, ParticipantRole::Admin),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            g.db.update_role(g.id, g.owner, g.member, ParticipantRole::Owner),
            Err(StoreError::Validation(_))
        ));

        let (p, changed) = g.db.update_role(g.id, g.owner, g.admin, ParticipantRole::Member).unwrap();
        assert!(changed);
        assert_eq!(p.role, ParticipantRole::Member);
        let (_, changed) = g.db.update_role(g.id, g.owner, g.admin, ParticipantRole::Member).unwrap();
        assert!(!changed);
    }

    #[test]
    fn owner_must_transfer_before_leaving() {
        let g = group();
        assert!(matches!(g.db.leave_group(g.id, g.owner), Err(StoreError::Forbidden(_))));
        g.db.leave_group(g.id, g.member).unwrap();
        assert_eq!(role_of(&g, g.member), None);
        assert!(matches!(g.db.leave_group(g.id, g.member), Err(StoreError::Forbidden(_))));
    }

    #[test]
    fn delete_cascades_everything() {
        let g = group();
        let msg = g
            .db
            .send_message(
                g.id,
                g.member,
                "",
                MessageKind::Image,
                Some(FileRef { file_url: "/files/a.png".into(), file_name: "a.png".into() }),
                None,
            )
            .unwrap();
        g.db.add_reaction(msg.id, g.owner, "🔥").unwrap();

        assert!(matches!(g.db.delete_group(g.id, g.admin), Err(StoreError::Forbidden(_))));

        let deleted = g.db.delete_group(g.id, g.owner).unwrap();
        assert_eq!(deleted.participant_ids.len(), 3);
        assert_eq!(deleted.files.len(), 1);

        let leftovers: i64 = g
            .db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM reactions) + (SELECT COUNT(*) FROM messages)
                          + (SELECT COUNT(*) FROM participants) + (SELECT COUNT(*) FROM conversations)",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(leftovers, 0);
        assert!(matches!(g.db.get_conversation(g.id), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn group_actions_reject_direct_conversations() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bo");
        let (direct, _) = db.get_or_create_direct(a, b).unwrap();
        assert!(matches!(db.delete_group(direct.id, a), Err(StoreError::Validation(_))));
        assert!(matches!(db.get_group_info(direct.id, a), Err(StoreError::Validation(_))));
    }

    #[test]
    fn update_group_renames_and_clears_avatar() {
        let g = group();
        let conv = g.db.update_group(g.id, g.admin, Some(" Rota 2 "), Some("/files/x.png")).unwrap();
        assert_eq!(conv.name.as_deref(), Some("Rota 2"));
        assert_eq!(conv.avatar_url.as_deref(), Some("/files/x.png"));

        let conv = g.db.update_group(g.id, g.owner, None, Some("")).unwrap();
        assert_eq!(conv.avatar_url, None);

        assert!(matches!(
            g.db.update_group(g.id, g.member, Some("mine"), None),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(g.db.update_group(g.id, g.owner, Some(" "), None), Err(StoreError::Validation(_))));
    }

    #[test]
    fn group_info_repairs_missing_owner() {
        let g = group();
        g.db.with_conn(|conn| {
            conn.execute("UPDATE participants SET role = 'member' WHERE role = 'owner'", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(owner_count(&g.db, g.id), 0);

        let info = g.db.get_group_info(g.id, g.member).unwrap();
        let owners: Vec<_> = info
            .participants
            .iter()
            .filter(|p| p.role == ParticipantRole::Owner)
            .collect();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].user_id, g.owner);
    }

    #[test]
    fn exactly_one_owner_after_arbitrary_operation_sequences() {
        let g = group();
        let extra: Vec<Uuid> = (0..3).map(|i| user(&g.db, &format!("u{i}"))).collect();
        let mut people = vec![g.owner, g.admin, g.member];
        people.extend(&extra);

        // xorshift: deterministic but well-mixed choice of op/actor/target
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = |n: usize| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % n as u64) as usize
        };

        for _ in 0..400 {
            let actor = people[next(people.len())];
            let target = people[next(people.len())];
            let _ = match next(6) {
                0 => g.db.add_members(g.id, actor, &[target]).map(|_| ()),
                1 => g.db.remove_member(g.id, actor, target),
                2 => g.db.leave_group(g.id, actor),
                3 => g.db.update_role(g.id, actor, target, ParticipantRole::Admin).map(|_| ()),
                4 => g.db.update_role(g.id, actor, target, ParticipantRole::Member).map(|_| ()),
                _ => g.db.transfer_ownership(g.id, actor, target),
            };
            assert_eq!(owner_count(&g.db, g.id), 1);
        }
    }
}
