use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use rally_types::events::ServerEvent;
use rally_types::models::{ConversationId, Message, MessageId, MessagePage, Reaction, ReactionId};

/// Loaded history of one conversation, ordered by message id.
#[derive(Debug, Clone)]
pub struct Timeline {
    conversation_id: ConversationId,
    messages: BTreeMap<MessageId, Message>,
    /// Highest page number fetched so far (page 1 is the newest).
    pages_loaded: u32,
    has_more: bool,
    next_temp_id: ReactionId,
    /// Optimistic removals awaiting the server, by reaction id.
    removed: HashMap<ReactionId, Reaction>,
}

impl Timeline {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: BTreeMap::new(),
            pages_loaded: 0,
            has_more: true,
            next_temp_id: -1,
            removed: HashMap::new(),
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Messages oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn newest_id(&self) -> Option<MessageId> {
        self.messages.keys().next_back().copied()
    }

    /// Merge a fetched page. Messages already present (e.g. delivered live
    /// while the request was in flight) keep their live state.
    pub fn apply_page(&mut self, page: MessagePage) {
        for message in page.messages {
            if message.conversation_id == self.conversation_id {
                self.messages.entry(message.id).or_insert(message);
            }
        }
        self.pages_loaded = self.pages_loaded.max(page.page);
        if page.page >= self.pages_loaded {
            self.has_more = page.has_more;
        }
    }

    /// The page to request next. Nothing loaded yet means page 1; after that,
    /// only when scrolled to the top and the server reported more.
    pub fn next_page_to_fetch(&self, at_top: bool) -> Option<u32> {
        if self.pages_loaded == 0 {
            return Some(1);
        }
        (at_top && self.has_more).then_some(self.pages_loaded + 1)
    }

    /// Apply a socket event. Returns true if the timeline changed. Events
    /// for other conversations and repeats are ignored.
    pub fn apply_event(&mut self, event: &ServerEvent) -> bool {
        if event.conversation_id() != Some(self.conversation_id) {
            return false;
        }

        match event {
            ServerEvent::Message(message) => {
                if self.messages.contains_key(&message.id) {
                    debug!("Duplicate message {} ignored", message.id);
                    return false;
                }
                self.messages.insert(message.id, message.clone());
                true
            }

            ServerEvent::MessageEdited {
                id,
                content,
                is_edited,
                updated_at,
                ..
            } => match self.messages.get_mut(id) {
                Some(message) if !message.is_deleted && message.updated_at <= *updated_at => {
                    message.content = content.clone();
                    message.is_edited = *is_edited;
                    message.updated_at = *updated_at;
                    true
                }
                _ => false,
            },

            ServerEvent::MessageDeleted { id, deleted_at, .. } => match self.messages.get_mut(id) {
                Some(message) if !message.is_deleted => {
                    message.is_deleted = true;
                    message.deleted_at = Some(*deleted_at);
                    message.content.clear();
                    message.file = None;
                    true
                }
                _ => false,
            },

            ServerEvent::Reaction {
                message_id,
                reaction,
                ..
            } => self.confirm_reaction(*message_id, reaction.clone()),

            ServerEvent::ReactionRemoved {
                message_id,
                reaction_id,
                user_id,
                emoji,
                ..
            } => {
                self.removed.remove(reaction_id);
                let Some(message) = self.messages.get_mut(message_id) else {
                    return false;
                };
                let before = message.reactions.len();
                message
                    .reactions
                    .retain(|r| r.id != *reaction_id && !(r.user_id == *user_id && r.emoji == *emoji));
                message.reactions.len() != before
            }

            _ => false,
        }
    }

    /// Show `user_id`'s reaction immediately under a temporary negative id.
    /// Returns `None` if that reaction is already shown.
    pub fn add_reaction_optimistic(
        &mut self,
        message_id: MessageId,
        user_id: Uuid,
        emoji: &str,
    ) -> Option<ReactionId> {
        let message = self.messages.get_mut(&message_id)?;
        if message.is_deleted || has_reaction(message, user_id, emoji) {
            return None;
        }

        let temp_id = self.next_temp_id;
        self.next_temp_id -= 1;
        message.reactions.push(Reaction {
            id: temp_id,
            message_id,
            user_id,
            username: None,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        });
        Some(temp_id)
    }

    /// The add request failed: drop the temporary entry.
    pub fn rollback_reaction(&mut self, message_id: MessageId, temp_id: ReactionId) {
        if let Some(message) = self.messages.get_mut(&message_id) {
            message.reactions.retain(|r| r.id != temp_id);
        }
    }

    /// Hide `user_id`'s reaction immediately. Returns its id, needed for the
    /// remove request and for [`Self::restore_reaction`]. A negative id is an
    /// unconfirmed add; remove it by emoji instead.
    pub fn remove_reaction_optimistic(
        &mut self,
        message_id: MessageId,
        user_id: Uuid,
        emoji: &str,
    ) -> Option<ReactionId> {
        let message = self.messages.get_mut(&message_id)?;
        let index = message
            .reactions
            .iter()
            .position(|r| r.user_id == user_id && r.emoji == emoji)?;
        let reaction = message.reactions.remove(index);
        let id = reaction.id;
        self.removed.insert(id, reaction);
        Some(id)
    }

    /// The remove request failed: put the reaction back.
    pub fn restore_reaction(&mut self, reaction_id: ReactionId) -> bool {
        let Some(reaction) = self.removed.remove(&reaction_id) else {
            return false;
        };
        match self.messages.get_mut(&reaction.message_id) {
            Some(message) if !has_reaction(message, reaction.user_id, &reaction.emoji) => {
                message.reactions.push(reaction);
                true
            }
            _ => false,
        }
    }

    /// Reconcile a server-confirmed reaction: replace the pending entry with
    /// the same (emoji, user), or append. Fed by `chat:reaction` events and by
    /// the add response, which carries the stored row even when the add was a
    /// no-op and no event was sent.
    pub fn confirm_reaction(&mut self, message_id: MessageId, reaction: Reaction) -> bool {
        let Some(message) = self.messages.get_mut(&message_id) else {
            return false;
        };
        if message.reactions.iter().any(|r| r.id == reaction.id) {
            return false;
        }
        match message
            .reactions
            .iter_mut()
            .find(|r| r.id < 0 && r.user_id == reaction.user_id && r.emoji == reaction.emoji)
        {
            Some(pending) => *pending = reaction,
            None => message.reactions.push(reaction),
        }
        true
    }
}

fn has_reaction(message: &Message, user_id: Uuid, emoji: &str) -> bool {
    message
        .reactions
        .iter()
        .any(|r| r.user_id == user_id && r.emoji == emoji)
}
