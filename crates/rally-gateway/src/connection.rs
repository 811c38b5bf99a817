use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rally_db::Database;
use rally_types::events::{ClientCommand, ServerEvent};
use rally_types::models::{ConversationId, Identity};

use crate::dispatcher::{Dispatcher, SessionKey};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serve one authenticated socket until it closes, is replaced, or stops
/// answering pings. The token was validated at the HTTP upgrade.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    identity: Identity,
) {
    let (mut sender, receiver) = socket.split();
    let key = SessionKey {
        user_id: identity.user_id,
        device_class: identity.device_class,
    };

    info!(
        "{} ({}) connected to gateway on {}",
        identity.username, identity.user_id, identity.device_class
    );

    let ready = ServerEvent::Ready {
        user_id: identity.user_id,
        username: identity.username.clone(),
        device_class: identity.device_class,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Subscribe first so this connection sees its own presence snapshot
    let broadcast_rx = dispatcher.subscribe();
    let (conn_id, user_rx) = dispatcher.connect(key).await;

    run_connection_loop(sender, receiver, broadcast_rx, user_rx, &dispatcher, db, &identity, key, conn_id)
        .await;

    dispatcher.disconnect(key, conn_id).await;
    info!(
        "{} ({}) disconnected from gateway on {}",
        identity.username, identity.user_id, identity.device_class
    );
}

#[allow(clippy::too_many_arguments)]
async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut broadcast_rx: tokio::sync::broadcast::Receiver<ServerEvent>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
    dispatcher: &Dispatcher,
    db: Arc<Database>,
    identity: &Identity,
    key: SessionKey,
    conn_id: Uuid,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward global + personal events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    // Channel closed: this session was replaced
                    let Some(event) = result else { break };
                    let terminated = matches!(event, ServerEvent::SessionTerminated { .. });
                    if send_event(&mut sender, &event).await.is_err() || terminated {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_dispatcher = dispatcher.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, &db, &recv_identity, key, conn_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_identity.username,
                            recv_identity.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize {}: {}", event.name(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    identity: &Identity,
    key: SessionKey,
    conn_id: Uuid,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::Join { conversation_id } => {
            if !is_participant(db, conversation_id, identity).await {
                warn!(
                    "{} ({}) tried to join conversation {} without membership",
                    identity.username, identity.user_id, conversation_id
                );
                return;
            }
            if dispatcher.join_room(conversation_id, key, conn_id).await {
                debug!("{} ({}) joined room {}", identity.username, identity.user_id, conversation_id);
            } else {
                debug!("Ignoring join of room {} from replaced session {}", conversation_id, conn_id);
            }
        }

        ClientCommand::Leave { conversation_id } => {
            debug!("{} ({}) left room {}", identity.username, identity.user_id, conversation_id);
            dispatcher.leave_room(conversation_id, key).await;
        }

        // Typing is scoped to the room; the sender's other devices don't see it
        ClientCommand::TypingStart { conversation_id, .. } => {
            if dispatcher.in_room(conversation_id, key).await {
                let event = ServerEvent::TypingStart {
                    conversation_id,
                    user_id: identity.user_id,
                    username: identity.username.clone(),
                };
                dispatcher
                    .notify_room(conversation_id, &event, Some(identity.user_id))
                    .await;
            }
        }

        ClientCommand::TypingStop { conversation_id } => {
            if dispatcher.in_room(conversation_id, key).await {
                let event = ServerEvent::TypingStop {
                    conversation_id,
                    user_id: identity.user_id,
                };
                dispatcher
                    .notify_room(conversation_id, &event, Some(identity.user_id))
                    .await;
            }
        }
    }
}

async fn is_participant(db: &Arc<Database>, conversation_id: ConversationId, identity: &Identity) -> bool {
    let db = db.clone();
    let user_id = identity.user_id;
    match tokio::task::spawn_blocking(move || db.is_participant(conversation_id, user_id)).await {
        Ok(Ok(is_member)) => is_member,
        Ok(Err(e)) => {
            warn!("Membership check for {} failed: {}", conversation_id, e);
            false
        }
        Err(e) => {
            warn!("Membership check task failed: {}", e);
            false
        }
    }
}
