use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use rally_types::api::{AddMembersRequest, TransferOwnershipRequest, UpdateRoleRequest};
use rally_types::events::ServerEvent;
use rally_types::models::{ConversationId, Identity, ParticipantRole};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /conversations/{id}/members
pub async fn add_members(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddMembersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = identity.user_id;
    let (added, participant_ids) = state
        .store(move |db| {
            let added = db.add_members(conversation_id, actor, &req.user_ids)?;
            Ok((added, db.participant_ids(conversation_id)?))
        })
        .await?;

    if !added.is_empty() {
        let event = ServerEvent::MemberAdded {
            conversation_id,
            added_by: actor,
            members: added.clone(),
        };
        state.dispatcher.notify_users(&participant_ids, &event).await;
    }

    Ok(Json(added))
}

/// DELETE /conversations/{id}/members/{user_id}
pub async fn remove_member(
    State(state): State<AppState>,
    Path((conversation_id, target)): Path<(ConversationId, Uuid)>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = identity.user_id;
    let remaining = state
        .store(move |db| {
            db.remove_member(conversation_id, actor, target)?;
            db.participant_ids(conversation_id)
        })
        .await?;

    announce_departure(&state, conversation_id, target, actor, remaining).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /conversations/{id}/leave
pub async fn leave_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let remaining = state
        .store(move |db| {
            db.leave_group(conversation_id, user_id)?;
            db.participant_ids(conversation_id)
        })
        .await?;

    announce_departure(&state, conversation_id, user_id, user_id, remaining).await;
    Ok(StatusCode::NO_CONTENT)
}

/// The departed user is no longer a participant, so they get the event on
/// their personal channel and lose the room.
async fn announce_departure(
    state: &AppState,
    conversation_id: ConversationId,
    user_id: Uuid,
    removed_by: Uuid,
    mut recipients: Vec<Uuid>,
) {
    recipients.push(user_id);
    let event = ServerEvent::MemberRemoved {
        conversation_id,
        user_id,
        removed_by,
    };
    state.dispatcher.notify_users(&recipients, &event).await;
    state.dispatcher.evict_from_room(conversation_id, user_id).await;
}

/// PATCH /conversations/{id}/members/{user_id}/role
pub async fn update_role(
    State(state): State<AppState>,
    Path((conversation_id, target)): Path<(ConversationId, Uuid)>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role: ParticipantRole = req
        .role
        .trim()
        .parse()
        .map_err(|e: rally_types::models::UnknownVariant| ApiError::BadRequest(e.to_string()))?;

    let actor = identity.user_id;
    let (participant, changed, participant_ids) = state
        .store(move |db| {
            let (participant, changed) = db.update_role(conversation_id, actor, target, role)?;
            Ok((participant, changed, db.participant_ids(conversation_id)?))
        })
        .await?;

    if changed {
        let event = ServerEvent::RoleUpdated {
            conversation_id,
            user_id: target,
            role,
        };
        state.dispatcher.notify_users(&participant_ids, &event).await;
    }

    Ok(Json(participant))
}

/// POST /conversations/{id}/transfer-ownership
pub async fn transfer_ownership(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<TransferOwnershipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = identity.user_id;
    let target = req.user_id;
    let group = state
        .store(move |db| {
            db.transfer_ownership(conversation_id, actor, target)?;
            db.get_group_info(conversation_id, actor)
        })
        .await?;

    let participant_ids: Vec<_> = group.participants.iter().map(|p| p.user_id).collect();
    let event = ServerEvent::OwnershipTransferred {
        conversation_id,
        previous_owner_id: actor,
        new_owner_id: target,
    };
    state.dispatcher.notify_users(&participant_ids, &event).await;

    Ok(Json(group))
}
