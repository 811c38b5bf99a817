use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Conversation, ConversationId, DeviceClass, Message, MessageId, Participant, ParticipantRole,
    Reaction, ReactionId,
};

/// Events pushed from the server over the socket.
///
/// Delivery is at-most-once: a connection that is gone when an event is
/// produced never sees it and must refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Connection accepted
    #[serde(rename = "ready")]
    Ready {
        user_id: Uuid,
        username: String,
        device_class: DeviceClass,
    },

    /// This session was closed by the server, e.g. replaced by a newer
    /// connection of the same device class.
    #[serde(rename = "session:terminated")]
    SessionTerminated { reason: String },

    /// Full snapshot of online user ids
    #[serde(rename = "users:online")]
    UsersOnline { user_ids: Vec<Uuid> },

    #[serde(rename = "chat:message")]
    Message(Message),

    /// Patch carrying only the fields an edit changes
    #[serde(rename = "chat:message_edited")]
    MessageEdited {
        id: MessageId,
        conversation_id: ConversationId,
        content: String,
        is_edited: bool,
        updated_at: DateTime<Utc>,
    },

    #[serde(rename = "chat:message_deleted")]
    MessageDeleted {
        id: MessageId,
        conversation_id: ConversationId,
        is_deleted: bool,
        deleted_at: DateTime<Utc>,
    },

    #[serde(rename = "chat:message_read")]
    MessageRead {
        conversation_id: ConversationId,
        user_id: Uuid,
        message_id: MessageId,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "chat:reaction")]
    Reaction {
        conversation_id: ConversationId,
        message_id: MessageId,
        reaction: Reaction,
    },

    #[serde(rename = "chat:reaction_removed")]
    ReactionRemoved {
        conversation_id: ConversationId,
        message_id: MessageId,
        reaction_id: ReactionId,
        user_id: Uuid,
        emoji: String,
    },

    #[serde(rename = "chat:typing_start")]
    TypingStart {
        conversation_id: ConversationId,
        user_id: Uuid,
        username: String,
    },

    #[serde(rename = "chat:typing_stop")]
    TypingStop {
        conversation_id: ConversationId,
        user_id: Uuid,
    },

    #[serde(rename = "chat:member_added")]
    MemberAdded {
        conversation_id: ConversationId,
        added_by: Uuid,
        members: Vec<Participant>,
    },

    /// `removed_by == user_id` when the member left on their own.
    #[serde(rename = "chat:member_removed")]
    MemberRemoved {
        conversation_id: ConversationId,
        user_id: Uuid,
        removed_by: Uuid,
    },

    #[serde(rename = "chat:role_updated")]
    RoleUpdated {
        conversation_id: ConversationId,
        user_id: Uuid,
        role: ParticipantRole,
    },

    #[serde(rename = "chat:ownership_transferred")]
    OwnershipTransferred {
        conversation_id: ConversationId,
        previous_owner_id: Uuid,
        new_owner_id: Uuid,
    },

    #[serde(rename = "chat:group_deleted")]
    GroupDeleted { conversation_id: ConversationId },

    #[serde(rename = "chat:group_updated")]
    GroupUpdated { conversation: Conversation },

    #[serde(rename = "chat:conversation_created")]
    ConversationCreated {
        conversation: Conversation,
        participant_ids: Vec<Uuid>,
    },
}

impl ServerEvent {
    /// Returns the conversation an event belongs to, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::Message(message) => Some(message.conversation_id),
            Self::MessageEdited { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::MessageRead { conversation_id, .. }
            | Self::Reaction { conversation_id, .. }
            | Self::ReactionRemoved { conversation_id, .. }
            | Self::TypingStart { conversation_id, .. }
            | Self::TypingStop { conversation_id, .. }
            | Self::MemberAdded { conversation_id, .. }
            | Self::MemberRemoved { conversation_id, .. }
            | Self::RoleUpdated { conversation_id, .. }
            | Self::OwnershipTransferred { conversation_id, .. }
            | Self::GroupDeleted { conversation_id } => Some(*conversation_id),
            Self::GroupUpdated { conversation } | Self::ConversationCreated { conversation, .. } => {
                Some(conversation.id)
            }
            Self::Ready { .. } | Self::SessionTerminated { .. } | Self::UsersOnline { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::SessionTerminated { .. } => "session:terminated",
            Self::UsersOnline { .. } => "users:online",
            Self::Message(_) => "chat:message",
            Self::MessageEdited { .. } => "chat:message_edited",
            Self::MessageDeleted { .. } => "chat:message_deleted",
            Self::MessageRead { .. } => "chat:message_read",
            Self::Reaction { .. } => "chat:reaction",
            Self::ReactionRemoved { .. } => "chat:reaction_removed",
            Self::TypingStart { .. } => "chat:typing_start",
            Self::TypingStop { .. } => "chat:typing_stop",
            Self::MemberAdded { .. } => "chat:member_added",
            Self::MemberRemoved { .. } => "chat:member_removed",
            Self::RoleUpdated { .. } => "chat:role_updated",
            Self::OwnershipTransferred { .. } => "chat:ownership_transferred",
            Self::GroupDeleted { .. } => "chat:group_deleted",
            Self::GroupUpdated { .. } => "chat:group_updated",
            Self::ConversationCreated { .. } => "chat:conversation_created",
        }
    }
}

/// Commands sent FROM client TO server over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    /// Enter a conversation room (thread opened)
    #[serde(rename = "chat:join")]
    Join {
        #[serde(alias = "conversationId")]
        conversation_id: ConversationId,
    },

    /// Leave a conversation room (thread closed)
    #[serde(rename = "chat:leave")]
    Leave {
        #[serde(alias = "conversationId")]
        conversation_id: ConversationId,
    },

    #[serde(rename = "chat:typing_start")]
    TypingStart {
        #[serde(alias = "conversationId")]
        conversation_id: ConversationId,
        username: Option<String>,
    },

    #[serde(rename = "chat:typing_stop")]
    TypingStop {
        #[serde(alias = "conversationId")]
        conversation_id: ConversationId,
    },
}
