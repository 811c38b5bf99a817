//! Typing indicators.
//!
//! [`TypingThrottle`] decides what the local composer sends: at most one
//! start per window however fast the user types, and a stop after a window
//! of silence, on empty input, or on blur. [`RemoteTyping`] tracks who else
//! is typing from incoming events, expiring entries whose stop was lost.
//! Both are driven by caller-supplied [`Instant`]s.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

pub const TYPING_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Outgoing typing state for one conversation's composer.
#[derive(Debug, Clone, Default)]
pub struct TypingThrottle {
    last_start: Option<Instant>,
    last_input: Option<Instant>,
}

impl TypingThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_typing(&self) -> bool {
        self.last_input.is_some()
    }

    /// The composer text changed.
    pub fn on_input(&mut self, now: Instant, text: &str) -> Option<TypingSignal> {
        if text.trim().is_empty() {
            return self.stop();
        }

        self.last_input = Some(now);
        let due = self
            .last_start
            .is_none_or(|sent| now.saturating_duration_since(sent) >= TYPING_WINDOW);
        if due {
            self.last_start = Some(now);
            Some(TypingSignal::Start)
        } else {
            None
        }
    }

    /// Call periodically (or at [`Self::deadline`]).
    pub fn on_tick(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.last_input {
            Some(input) if now.saturating_duration_since(input) >= TYPING_WINDOW => self.stop(),
            _ => None,
        }
    }

    /// Input lost focus, or the message was sent.
    pub fn on_blur(&mut self) -> Option<TypingSignal> {
        self.stop()
    }

    /// When the inactivity stop will fire, if typing.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_input.map(|input| input + TYPING_WINDOW)
    }

    // `last_start` survives a stop: the window bounds starts, not sessions.
    fn stop(&mut self) -> Option<TypingSignal> {
        self.last_input.take().map(|_| TypingSignal::Stop)
    }
}

/// Incoming typing state for one conversation.
#[derive(Debug, Clone, Default)]
pub struct RemoteTyping {
    typing: HashMap<Uuid, (String, Instant)>,
}

impl RemoteTyping {
    pub fn start(&mut self, user_id: Uuid, username: &str, now: Instant) {
        self.typing.insert(user_id, (username.to_string(), now));
    }

    pub fn stop(&mut self, user_id: Uuid) {
        self.typing.remove(&user_id);
    }

    /// Names of users still typing, sorted. Entries older than two windows
    /// are dropped, since a start is re-sent at least once per window.
    pub fn active(&mut self, now: Instant) -> Vec<String> {
        self.typing
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) < TYPING_WINDOW * 2);
        let mut names: Vec<String> = self.typing.values().map(|(name, _)| name.clone()).collect();
        names.sort();
        names
    }
}
