use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use rally_types::api::{
    CreateDirectRequest, CreateDirectResponse, CreateGroupRequest, MessagesQuery,
    NotificationSettingsRequest, UpdateGroupRequest,
};
use rally_types::events::ServerEvent;
use rally_types::models::{ConversationId, Identity};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /conversations: the caller's conversations, most recent first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let summaries = state.store(move |db| db.list_conversations(user_id)).await?;
    Ok(Json(summaries))
}

/// POST /conversations: find or create the direct conversation with `user_id`.
pub async fn create_direct(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateDirectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = identity.user_id;
    let peer = req.user_id;
    let (conversation, created) = state
        .store(move |db| db.get_or_create_direct(me, peer))
        .await?;

    let status = if created {
        info!("{} started a direct conversation {} with {}", me, conversation.id, peer);
        let participant_ids = vec![me, peer];
        let event = ServerEvent::ConversationCreated {
            conversation: conversation.clone(),
            participant_ids: participant_ids.clone(),
        };
        state.dispatcher.notify_users(&participant_ids, &event).await;
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(CreateDirectResponse {
            conversation_id: conversation.id,
            created,
        }),
    ))
}

/// POST /conversations/group
pub async fn create_group(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity.user_id;
    let group = state
        .store(move |db| db.create_group(owner, req.name.as_deref(), &req.member_ids))
        .await?;

    let participant_ids: Vec<_> = group.participants.iter().map(|p| p.user_id).collect();
    info!(
        "{} created group {} with {} participants",
        identity.username,
        group.conversation.id,
        participant_ids.len()
    );
    let event = ServerEvent::ConversationCreated {
        conversation: group.conversation.clone(),
        participant_ids: participant_ids.clone(),
    };
    state.dispatcher.notify_users(&participant_ids, &event).await;

    Ok((StatusCode::CREATED, Json(group)))
}

/// GET /conversations/{id}: group details with participants.
pub async fn get_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let group = state
        .store(move |db| db.get_group_info(conversation_id, user_id))
        .await?;
    Ok(Json(group))
}

/// PATCH /conversations/{id}
pub async fn update_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = identity.user_id;
    let (conversation, participant_ids) = state
        .store(move |db| {
            let conversation = db.update_group(
                conversation_id,
                actor,
                req.name.as_deref(),
                req.avatar_url.as_deref(),
            )?;
            Ok((conversation, db.participant_ids(conversation_id)?))
        })
        .await?;

    let event = ServerEvent::GroupUpdated {
        conversation: conversation.clone(),
    };
    state.dispatcher.notify_users(&participant_ids, &event).await;

    Ok(Json(conversation))
}

/// DELETE /conversations/{id}: owner only; removes everything in the group.
pub async fn delete_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = identity.user_id;
    let deleted = state
        .store(move |db| db.delete_group(conversation_id, actor))
        .await?;

    let event = ServerEvent::GroupDeleted { conversation_id };
    state
        .dispatcher
        .notify_users(&deleted.participant_ids, &event)
        .await;
    state.dispatcher.close_room(conversation_id).await;
    state.media.remove_all(&deleted.files).await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /conversations/{id}/messages?page=
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<MessagesQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let page = state
        .store(move |db| db.get_messages(conversation_id, user_id, query.page))
        .await?;
    Ok(Json(page))
}

/// PATCH /conversations/{id}/notifications
pub async fn set_notifications(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<NotificationSettingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    state
        .store(move |db| db.set_notifications(conversation_id, user_id, req.enabled))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
