use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

use rally_types::models::ConversationId;

use crate::dispatcher::SessionKey;

/// Which sessions currently have a conversation open.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<ConversationId, HashSet<SessionKey>>>,
}

impl RoomRegistry {
    pub async fn join(&self, conversation_id: ConversationId, session: SessionKey) {
        self.rooms
            .write()
            .await
            .entry(conversation_id)
            .or_default()
            .insert(session);
    }

    pub async fn leave(&self, conversation_id: ConversationId, session: SessionKey) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&conversation_id) {
            members.remove(&session);
            if members.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }

    /// Drop a session from every room (disconnect or replacement).
    pub async fn leave_all(&self, session: SessionKey) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&session);
            !members.is_empty()
        });
    }

    /// Remove every session of `user_id` from one room.
    pub async fn evict_user(&self, conversation_id: ConversationId, user_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&conversation_id) {
            members.retain(|s| s.user_id != user_id);
            if members.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }

    pub async fn drop_room(&self, conversation_id: ConversationId) {
        self.rooms.write().await.remove(&conversation_id);
    }

    pub async fn contains(&self, conversation_id: ConversationId, session: SessionKey) -> bool {
        self.rooms
            .read()
            .await
            .get(&conversation_id)
            .is_some_and(|members| members.contains(&session))
    }

    pub async fn members(&self, conversation_id: ConversationId) -> Vec<SessionKey> {
        self.rooms
            .read()
            .await
            .get(&conversation_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}
