use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;

use rally_types::api::{EditMessageRequest, MarkReadRequest, MarkReadResponse, SendMessageRequest};
use rally_types::events::ServerEvent;
use rally_types::models::{Identity, MessageId};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /messages
///
/// The stored message goes out on every participant's personal channel,
/// including the sender's, which is how the sending client learns of it.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = identity.user_id;
    let (message, participant_ids) = state
        .store(move |db| {
            let message = db.send_message(
                req.conversation_id,
                sender,
                &req.content,
                req.kind,
                req.file,
                req.reply_to_id,
            )?;
            Ok((message, db.participant_ids(req.conversation_id)?))
        })
        .await?;

    let delivery = state
        .dispatcher
        .notify_users(&participant_ids, &ServerEvent::Message(message.clone()))
        .await;
    debug!(
        "Message {} in {} reached {} session(s)",
        message.id, message.conversation_id, delivery.delivered
    );

    Ok((StatusCode::CREATED, Json(message)))
}

/// PATCH /messages/{id}: sender only.
pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let (message, participant_ids) = state
        .store(move |db| {
            let message = db.edit_message(message_id, user_id, &req.content)?;
            let ids = db.participant_ids(message.conversation_id)?;
            Ok((message, ids))
        })
        .await?;

    let event = ServerEvent::MessageEdited {
        id: message.id,
        conversation_id: message.conversation_id,
        content: message.content.clone(),
        is_edited: message.is_edited,
        updated_at: message.updated_at,
    };
    state.dispatcher.notify_users(&participant_ids, &event).await;

    Ok(Json(message))
}

/// DELETE /messages/{id}: sender only. Repeating it returns the tombstone
/// without emitting anything.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let (outcome, participant_ids) = state
        .store(move |db| {
            let outcome = db.delete_message(message_id, user_id)?;
            let ids = db.participant_ids(outcome.message.conversation_id)?;
            Ok((outcome, ids))
        })
        .await?;

    if outcome.newly_deleted {
        let message = &outcome.message;
        let event = ServerEvent::MessageDeleted {
            id: message.id,
            conversation_id: message.conversation_id,
            is_deleted: true,
            deleted_at: message.deleted_at.unwrap_or(message.updated_at),
        };
        state.dispatcher.notify_users(&participant_ids, &event).await;

        if let Some(file) = &outcome.removed_file {
            state.media.remove(&file.file_url).await;
        }
    }

    Ok(Json(outcome.message))
}

/// POST /messages/read: advance the caller's read cursor.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    let conversation_id = req.conversation_id;
    let (advance, participant_ids) = state
        .store(move |db| {
            let advance = db.mark_as_read(conversation_id, user_id, req.message_id)?;
            Ok((advance, db.participant_ids(conversation_id)?))
        })
        .await?;

    if let Some(advance) = advance {
        let others: Vec<_> = participant_ids.into_iter().filter(|id| *id != user_id).collect();
        let event = ServerEvent::MessageRead {
            conversation_id,
            user_id,
            message_id: advance.message_id,
            read_at: advance.read_at,
        };
        state.dispatcher.notify_users(&others, &event).await;
    }

    Ok(Json(MarkReadResponse {
        advanced: advance.is_some(),
    }))
}
