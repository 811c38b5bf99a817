use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use rally_types::events::ServerEvent;
use rally_types::models::{ConversationId, DeviceClass};

use crate::presence::OnlineUsers;
use crate::rooms::RoomRegistry;

/// Personal channel key: one live session per (user, device class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub user_id: Uuid,
    pub device_class: DeviceClass,
}

/// Outcome of a fan-out call.
///
/// Delivery is at-most-once and never blocks: an event is handed to the
/// sessions registered at call time, sessions that are gone count as
/// `dropped`, and nothing is queued or retried. Callers treat a dropped
/// event as normal; clients recover by refetching.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

impl Delivery {
    fn record(&mut self, ok: bool) {
        if ok {
            self.delivered += 1;
        } else {
            self.dropped += 1;
        }
    }
}

struct Session {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Presence & room router plus the fan-out entry points.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Global events (presence snapshots); every connection receives them
    broadcast_tx: broadcast::Sender<ServerEvent>,

    /// Personal channels: (user, device class) -> current session
    sessions: RwLock<HashMap<SessionKey, Session>>,

    online: OnlineUsers,

    rooms: RoomRegistry,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
                online: OnlineUsers::default(),
                rooms: RoomRegistry::default(),
            }),
        }
    }

    /// Subscribe to global events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Send an event to every connection. Returns the number of receivers.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.inner.broadcast_tx.send(event).unwrap_or(0)
    }

    /// Register the personal channel for `key` and mark the user online.
    ///
    /// An older session with the same key is told it was replaced and its
    /// channel is closed, which ends its connection loop.
    pub async fn connect(&self, key: SessionKey) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            // Session map, rooms and online set change under one guard so a
            // concurrent disconnect of another device sees a consistent view.
            let mut sessions = self.inner.sessions.write().await;
            if let Some(old) = sessions.insert(key, Session { conn_id, tx }) {
                info!(
                    "{} ({}) session {} replaced by {}",
                    key.user_id, key.device_class, old.conn_id, conn_id
                );
                let _ = old.tx.send(ServerEvent::SessionTerminated {
                    reason: "replaced".to_string(),
                });
                // Rooms are keyed by session; the new connection starts with none.
                self.inner.rooms.leave_all(key).await;
            }
            self.inner.online.add(key.user_id).await;
        }

        self.broadcast_presence().await;

        (conn_id, rx)
    }

    /// Tear down a session, but only if `conn_id` still owns `key`.
    /// The user goes offline only when no other device class remains.
    pub async fn disconnect(&self, key: SessionKey, conn_id: Uuid) {
        let went_offline = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get(&key) {
                Some(session) if session.conn_id == conn_id => {
                    sessions.remove(&key);
                }
                // A newer connection has taken over, don't touch anything
                _ => return,
            }
            self.inner.rooms.leave_all(key).await;

            let still_connected = sessions.keys().any(|k| k.user_id == key.user_id);
            !still_connected && self.inner.online.remove(key.user_id).await
        };

        if went_offline {
            self.broadcast_presence().await;
        }
    }

    async fn broadcast_presence(&self) {
        let user_ids = self.inner.online.snapshot().await;
        self.broadcast(ServerEvent::UsersOnline { user_ids });
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online.snapshot().await
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.online.contains(user_id).await
    }

    // -- Rooms --

    /// Join a room for the session identified by `conn_id`. A session that
    /// has been replaced or disconnected is refused. Returns whether it joined.
    pub async fn join_room(&self, conversation_id: ConversationId, key: SessionKey, conn_id: Uuid) -> bool {
        // Held across the join so a replacing connect cannot interleave.
        let sessions = self.inner.sessions.read().await;
        if !sessions.get(&key).is_some_and(|session| session.conn_id == conn_id) {
            return false;
        }
        self.inner.rooms.join(conversation_id, key).await;
        true
    }

    pub async fn leave_room(&self, conversation_id: ConversationId, key: SessionKey) {
        self.inner.rooms.leave(conversation_id, key).await;
    }

    pub async fn in_room(&self, conversation_id: ConversationId, key: SessionKey) -> bool {
        self.inner.rooms.contains(conversation_id, key).await
    }

    /// Remove a user who is no longer a participant from the room.
    pub async fn evict_from_room(&self, conversation_id: ConversationId, user_id: Uuid) {
        self.inner.rooms.evict_user(conversation_id, user_id).await;
    }

    pub async fn close_room(&self, conversation_id: ConversationId) {
        self.inner.rooms.drop_room(conversation_id).await;
    }

    // -- Fan-out --

    /// Deliver to the personal channel of every session of every listed user.
    pub async fn notify_users(&self, user_ids: &[Uuid], event: &ServerEvent) -> Delivery {
        let sessions = self.inner.sessions.read().await;
        let mut delivery = Delivery::default();

        for (key, session) in sessions.iter() {
            if user_ids.contains(&key.user_id) {
                delivery.record(send(key, session, event.clone()));
            }
        }

        trace_delivery(event, &delivery);
        delivery
    }

    /// Deliver to all sessions of one user.
    pub async fn notify_user(&self, user_id: Uuid, event: &ServerEvent) -> Delivery {
        self.notify_users(&[user_id], event).await
    }

    /// Deliver to one session only.
    pub async fn notify_session(&self, key: SessionKey, event: ServerEvent) -> Delivery {
        let sessions = self.inner.sessions.read().await;
        let mut delivery = Delivery::default();
        if let Some(session) = sessions.get(&key) {
            delivery.record(send(&key, session, event));
        }
        delivery
    }

    /// Deliver to sessions that have the conversation open, skipping every
    /// session of `except_user`.
    pub async fn notify_room(
        &self,
        conversation_id: ConversationId,
        event: &ServerEvent,
        except_user: Option<Uuid>,
    ) -> Delivery {
        let members = self.inner.rooms.members(conversation_id).await;
        let sessions = self.inner.sessions.read().await;
        let mut delivery = Delivery::default();

        for key in members {
            if Some(key.user_id) == except_user {
                continue;
            }
            if let Some(session) = sessions.get(&key) {
                delivery.record(send(&key, session, event.clone()));
            }
        }

        trace_delivery(event, &delivery);
        delivery
    }
}

fn send(key: &SessionKey, session: &Session, event: ServerEvent) -> bool {
    match session.tx.send(event) {
        Ok(()) => true,
        Err(err) => {
            debug!(
                "Dropped {} for {} ({}): connection gone",
                err.0.name(),
                key.user_id,
                key.device_class
            );
            false
        }
    }
}

fn trace_delivery(event: &ServerEvent, delivery: &Delivery) {
    debug!(
        "{} delivered to {} session(s), {} dropped",
        event.name(),
        delivery.delivered,
        delivery.dropped
    );
}
