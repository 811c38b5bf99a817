use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use rally_db::reactions::ReactionChange;
use rally_types::api::{ReactionQuery, ReactionRequest};
use rally_types::events::ServerEvent;
use rally_types::models::{Identity, MessageId, ReactionId};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /messages/{id}/reactions: repeating an identical add is a no-op.
pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let (change, participant_ids) = state
        .store(move |db| {
            let change = db.add_reaction(message_id, user_id, &req.emoji)?;
            let ids = db.participant_ids(change.conversation_id)?;
            Ok((change, ids))
        })
        .await?;

    if !change.changed {
        return Ok((StatusCode::OK, Json(change.reaction)));
    }

    let event = ServerEvent::Reaction {
        conversation_id: change.conversation_id,
        message_id,
        reaction: change.reaction.clone(),
    };
    state.dispatcher.notify_users(&participant_ids, &event).await;

    Ok((StatusCode::CREATED, Json(change.reaction)))
}

/// DELETE /messages/{id}/reactions?emoji=
pub async fn remove_reaction_by_emoji(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Query(query): Query<ReactionQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let removed = state
        .store(move |db| {
            match db.remove_reaction_by_emoji(message_id, user_id, &query.emoji)? {
                Some(change) => {
                    let ids = db.participant_ids(change.conversation_id)?;
                    Ok(Some((ids, change)))
                }
                None => Ok(None),
            }
        })
        .await?;

    if let Some((participant_ids, change)) = removed {
        announce_removal(&state, &participant_ids, change).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /messages/{id}/reactions/{reaction_id}: own reactions only.
/// A reaction that belongs to another message is a 404.
pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((message_id, reaction_id)): Path<(MessageId, ReactionId)>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let removed = state
        .store(move |db| {
            match db.remove_reaction(message_id, reaction_id, user_id)? {
                Some(change) => {
                    let ids = db.participant_ids(change.conversation_id)?;
                    Ok(Some((ids, change)))
                }
                None => Ok(None),
            }
        })
        .await?;

    if let Some((participant_ids, change)) = removed {
        announce_removal(&state, &participant_ids, change).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn announce_removal(state: &AppState, participant_ids: &[uuid::Uuid], change: ReactionChange) {
    let event = ServerEvent::ReactionRemoved {
        conversation_id: change.conversation_id,
        message_id: change.reaction.message_id,
        reaction_id: change.reaction.id,
        user_id: change.reaction.user_id,
        emoji: change.reaction.emoji,
    };
    state.dispatcher.notify_users(participant_ids, &event).await;
}
