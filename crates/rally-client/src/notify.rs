use uuid::Uuid;

use rally_types::events::ServerEvent;
use rally_types::models::{ConversationId, Message, MessageId, MessageKind};

const PREVIEW_CHARS: usize = 100;

/// What the platform notification shows for an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSummary {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub title: String,
    pub body: String,
}

/// Platform notification facility (OS toast, push bridge, ...).
pub trait LocalNotifier {
    fn notify(&self, summary: NotificationSummary);
}

/// A new message from someone else, in a conversation that is not on
/// screen and not muted.
pub fn should_notify_locally(
    event: &ServerEvent,
    me: Uuid,
    open_conversation: Option<ConversationId>,
    notifications_enabled: bool,
) -> bool {
    match event {
        ServerEvent::Message(message) => {
            notifications_enabled
                && message.sender_id != me
                && !message.is_deleted
                && open_conversation != Some(message.conversation_id)
        }
        _ => false,
    }
}

pub fn summarize(message: &Message) -> NotificationSummary {
    let body = match (message.kind, &message.file) {
        (MessageKind::Image, _) => "Sent an image".to_string(),
        (MessageKind::File, Some(file)) => format!("Sent a file: {}", file.file_name),
        (MessageKind::File, None) => "Sent a file".to_string(),
        (MessageKind::Text, _) => preview(&message.content),
    };
    NotificationSummary {
        conversation_id: message.conversation_id,
        message_id: message.id,
        title: message
            .sender_username
            .clone()
            .unwrap_or_else(|| "New message".to_string()),
        body,
    }
}

/// Hand the event to `notifier` if it qualifies. Returns whether it did.
pub fn notify_if_needed(
    notifier: &dyn LocalNotifier,
    event: &ServerEvent,
    me: Uuid,
    open_conversation: Option<ConversationId>,
    notifications_enabled: bool,
) -> bool {
    if !should_notify_locally(event, me, open_conversation, notifications_enabled) {
        return false;
    }
    let ServerEvent::Message(message) = event else {
        return false;
    };
    notifier.notify(summarize(message));
    true
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::Utc;
    use rally_types::models::FileRef;

    use super::*;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<NotificationSummary>>);

    impl LocalNotifier for Recorder {
        fn notify(&self, summary: NotificationSummary) {
            self.0.borrow_mut().push(summary);
        }
    }

    fn message(sender: Uuid, content: &str) -> Message {
        let at = Utc::now();
        Message {
            id: 11,
            conversation_id: 4,
            sender_id: sender,
            sender_username: Some("bo".into()),
            content: content.into(),
            kind: MessageKind::Text,
            file: None,
            reply_to: None,
            is_edited: false,
            is_deleted: false,
            deleted_at: None,
            created_at: at,
            updated_at: at,
            reactions: Vec::new(),
        }
    }

    #[test]
    fn only_unseen_messages_from_others_notify() {
        let me = Uuid::new_v4();
        let bo = Uuid::new_v4();
        let from_bo = ServerEvent::Message(message(bo, "hi"));
        let from_me = ServerEvent::Message(message(me, "hi"));

        assert!(should_notify_locally(&from_bo, me, None, true));
        assert!(should_notify_locally(&from_bo, me, Some(9), true));
        assert!(!should_notify_locally(&from_bo, me, Some(4), true));
        assert!(!should_notify_locally(&from_bo, me, None, false));
        assert!(!should_notify_locally(&from_me, me, None, true));

        let typing = ServerEvent::TypingStart { conversation_id: 4, user_id: bo, username: "bo".into() };
        assert!(!should_notify_locally(&typing, me, None, true));
    }

    #[test]
    fn summary_previews_text_and_describes_files() {
        let bo = Uuid::new_v4();
        let long = "x".repeat(150);
        let summary = summarize(&message(bo, &long));
        assert_eq!(summary.title, "bo");
        assert_eq!(summary.body.chars().count(), PREVIEW_CHARS + 1);

        let mut file = message(bo, "");
        file.kind = MessageKind::File;
        file.file = Some(FileRef { file_url: "/files/x".into(), file_name: "q3.xlsx".into() });
        assert_eq!(summarize(&file).body, "Sent a file: q3.xlsx");
    }

    #[test]
    fn notifier_receives_qualifying_events() {
        let recorder = Recorder::default();
        let me = Uuid::new_v4();
        let event = ServerEvent::Message(message(Uuid::new_v4(), "ping"));

        assert!(notify_if_needed(&recorder, &event, me, None, true));
        assert!(!notify_if_needed(&recorder, &event, me, Some(4), true));
        let seen = recorder.0.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].body, "ping");
    }
}
