use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use encore_types::events::{ClientCommand, ServerEvent};

use crate::chat::Chat;
use crate::registry::ConnectionHandle;
use crate::session::Session;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one authenticated, registered WebSocket connection until either side
/// goes away, then tear the registration down.
pub async fn handle_connection(socket: WebSocket, chat: Chat, session: Session) {
    let (mut sender, mut receiver) = socket.split();
    let Session {
        principal,
        handle,
        mut events,
    } = session;
    let conn_id = handle.id();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode {} event: {}", event.name(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout on {} (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
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

    // Read commands from client
    let chat_recv = chat.clone();
    let handle_recv = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
                    Ok(cmd) => handle_command(&chat_recv, &handle_recv, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            handle_recv.user_id(),
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                        handle_recv.send(ServerEvent::Error {
                            message: "Malformed command".to_string(),
                        });
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

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    chat.sessions.close(conn_id).await;
    info!("User {} disconnected ({})", principal.user_id, conn_id);
}

/// Execute one client command. Failures go back to the originating connection
/// as an `error` event and never end the connection.
pub async fn handle_command(chat: &Chat, handle: &ConnectionHandle, cmd: ClientCommand) {
    let user_id = handle.user_id();
    let result = match cmd {
        ClientCommand::SendMessage {
            content,
            conversation_id,
        } => chat
            .messages
            .send(user_id, conversation_id, content)
            .await
            .map(drop),

        ClientCommand::MarkMessageRead { message_id } => chat
            .receipts
            .mark_as_read(message_id, user_id)
            .await
            .map(drop),

        ClientCommand::Typing {
            conversation_id,
            is_typing,
        } => chat
            .typing
            .relay(user_id, handle.id(), conversation_id, is_typing)
            .await
            .map(drop),
    };

    if let Err(e) = result {
        debug!("Command from {} on {} failed: {}", user_id, handle.id(), e);
        handle.send(ServerEvent::Error {
            message: e.client_message(),
        });
    }
}
