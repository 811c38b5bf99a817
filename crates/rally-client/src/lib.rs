//! Client-side reconciliation of server events.
//!
//! Everything here is synchronous state driven by the caller: a UI feeds in
//! fetched pages, socket events and user input, and reads back what to show
//! or send. Sent messages are never echoed locally; they appear once the
//! server's `chat:message` arrives. Reactions are optimistic.

pub mod notify;
pub mod timeline;
pub mod typing;

pub use notify::{LocalNotifier, NotificationSummary, notify_if_needed, should_notify_locally};
pub use timeline::Timeline;
pub use typing::{RemoteTyping, TYPING_WINDOW, TypingSignal, TypingThrottle};
