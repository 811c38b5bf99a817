//! Role rules for group mutations.
//!
//! | Action            | Actor         | Notes                                   |
//! |-------------------|---------------|-----------------------------------------|
//! | add member        | owner, admin  | new participant joins as member         |
//! | remove member     | owner, admin  | never the owner; admin cannot kick admin|
//! | promote / demote  | owner         | member <-> admin only                   |
//! | transfer owner    | owner         | applied as one transaction              |
//! | delete group      | owner         | cascades messages and participants      |
//! | update name/avatar| owner, admin  |                                         |
//! | leave             | admin, member | owner must transfer first               |
//!
//! These checks are pure; the transactional side lives in `groups.rs`.

use rally_types::models::ParticipantRole;

use crate::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    AddMember,
    RemoveMember { target: ParticipantRole },
    ChangeRole { target: ParticipantRole, new_role: ParticipantRole },
    TransferOwnership,
    DeleteGroup,
    UpdateGroup,
    Leave,
}

pub fn authorize(actor: ParticipantRole, action: GroupAction) -> Result<()> {
    use ParticipantRole::{Admin, Member, Owner};

    match action {
        GroupAction::AddMember | GroupAction::UpdateGroup => match actor {
            Owner | Admin => Ok(()),
            Member => Err(StoreError::forbidden("only owners and admins can do this")),
        },
        GroupAction::RemoveMember { target } => match (actor, target) {
            (_, Owner) => Err(StoreError::forbidden("the owner cannot be removed")),
            (Owner, _) => Ok(()),
            (Admin, Member) => Ok(()),
            (Admin, Admin) => Err(StoreError::forbidden("admins cannot remove other admins")),
            (Member, _) => Err(StoreError::forbidden("only owners and admins can remove members")),
        },
        GroupAction::ChangeRole { target, new_role } => {
            if actor != Owner {
                return Err(StoreError::forbidden("only the owner can change roles"));
            }
            if new_role == Owner {
                return Err(StoreError::validation(
                    "ownership can only be handed over with a transfer",
                ));
            }
            if target == Owner {
                return Err(StoreError::forbidden("the owner's role cannot be changed"));
            }
            Ok(())
        }
        GroupAction::TransferOwnership => match actor {
            Owner => Ok(()),
            _ => Err(StoreError::forbidden("only the owner can transfer ownership")),
        },
        GroupAction::DeleteGroup => match actor {
            Owner => Ok(()),
            _ => Err(StoreError::forbidden("only the owner can delete the group")),
        },
        GroupAction::Leave => match actor {
            Owner => Err(StoreError::forbidden(
                "the owner must transfer ownership before leaving",
            )),
            Admin | Member => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ParticipantRole::{Admin, Member, Owner};

    fn allowed(actor: ParticipantRole, action: GroupAction) -> bool {
        authorize(actor, action).is_ok()
    }

    #[test]
    fn add_member_needs_owner_or_admin() {
        assert!(allowed(Owner, GroupAction::AddMember));
        assert!(allowed(Admin, GroupAction::AddMember));
        assert!(!allowed(Member, GroupAction::AddMember));
    }

    #[test]
    fn remove_member_matrix() {
        let cases = [
            (Owner, Admin, true),
            (Owner, Member, true),
            (Owner, Owner, false),
            (Admin, Member, true),
            (Admin, Admin, false),
            (Admin, Owner, false),
            (Member, Member, false),
        ];
        for (actor, target, expected) in cases {
            assert_eq!(
                allowed(actor, GroupAction::RemoveMember { target }),
                expected,
                "{actor} removing {target}"
            );
        }
    }

    #[test]
    fn only_owner_changes_roles() {
        let promote = GroupAction::ChangeRole { target: Member, new_role: Admin };
        assert!(allowed(Owner, promote));
        assert!(!allowed(Admin, promote));
        assert!(!allowed(Member, promote));
    }

    #[test]
    fn change_role_cannot_mint_or_demote_owner() {
        let mint = GroupAction::ChangeRole { target: Admin, new_role: Owner };
        assert!(matches!(authorize(Owner, mint), Err(StoreError::Validation(_))));

        let demote_owner = GroupAction::ChangeRole { target: Owner, new_role: Admin };
        assert!(matches!(authorize(Owner, demote_owner), Err(StoreError::Forbidden(_))));
    }

    #[test]
    fn owner_only_actions() {
        for action in [GroupAction::TransferOwnership, GroupAction::DeleteGroup] {
            assert!(allowed(Owner, action));
            assert!(!allowed(Admin, action));
            assert!(!allowed(Member, action));
        }
    }

    #[test]
    fn owner_cannot_leave() {
        assert!(!allowed(Owner, GroupAction::Leave));
        assert!(allowed(Admin, GroupAction::Leave));
        assert!(allowed(Member, GroupAction::Leave));
    }
}
