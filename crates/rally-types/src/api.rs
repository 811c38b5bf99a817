use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationId, FileRef, MessageId, MessageKind};

// -- JWT Claims --

/// Claims issued by the identity provider. Shared by the REST middleware and
/// the WebSocket upgrade so both boundaries build the same `Identity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default = "default_user_role")]
    pub role: String,
    pub exp: usize,
}

fn default_user_role() -> String {
    "user".to_string()
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDirectRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDirectResponse {
    pub conversation_id: ConversationId,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationSettingsRequest {
    pub enabled: bool,
}

// -- Membership --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub user_ids: Vec<Uuid>,
}

/// `role` stays a string so an unknown value surfaces as a validation error
/// rather than a body-rejection.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferOwnershipRequest {
    pub user_id: Uuid,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub file: Option<FileRef>,
    pub reply_to_id: Option<MessageId>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub advanced: bool,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionQuery {
    pub emoji: String,
}
