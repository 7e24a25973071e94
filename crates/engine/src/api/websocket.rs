//! WebSocket handling for client connections.
//!
//! The transport owns the join handshake: token verification and capacity
//! enforcement both happen here, before anything reaches a room's queue. A
//! rejected connection never creates a participant. After the handshake, the
//! socket loop is a thin translator from wire messages to room commands.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use rand::{distributions::Alphanumeric, Rng};
use tokio::sync::mpsc;

use plaza_domain::SessionId;
use plaza_protocol::{ClientMessage, ErrorCode, ServerMessage};

use crate::infrastructure::ports::AuthPort;
use crate::room::{JoinError, RoomCommand, RoomRegistry};

/// Buffer size for per-connection message channel.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// How long a fresh connection gets to send its join frame.
const JOIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of generated client session ids.
const SESSION_ID_LEN: usize = 9;

/// Room used when a join names no channel.
pub const DEFAULT_CHANNEL: &str = "plaza";

/// Combined state for WebSocket handlers.
pub struct WsState {
    pub registry: RoomRegistry,
    pub auth: Arc<dyn AuthPort>,
}

/// WebSocket upgrade handler - entry point for new connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Bounded channel for messages to this client, drained by its own task.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CONNECTION_CHANNEL_BUFFER);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // First frame must be a join.
    let join = tokio::time::timeout(JOIN_HANDSHAKE_TIMEOUT, read_join(&mut ws_receiver)).await;
    let Ok(Some(join)) = join else {
        return reject(tx, send_task, ErrorCode::BadRequest, "Expected a join message").await;
    };

    let claims = match state.auth.verify(join.auth_token.as_deref()).await {
        Ok(claims) => claims,
        Err(e) => {
            tracing::info!(error = %e, "Join rejected by auth verifier");
            return reject(tx, send_task, ErrorCode::AuthRejected, "Authentication failed").await;
        }
    };

    let channel = join
        .channel_id
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
    let ticket = match state.registry.checkout(&channel, join.observer) {
        Ok(ticket) => ticket,
        Err(JoinError::RoomFull) => {
            tracing::info!(channel = %channel, "Join rejected, room at capacity");
            return reject(tx, send_task, ErrorCode::RoomFull, "Room is at capacity").await;
        }
    };

    let session_id = generate_session_id();
    let joined = ticket
        .handle
        .send(RoomCommand::Join {
            session_id: session_id.clone(),
            username: claims.username,
            observer: join.observer,
            sender: tx.clone(),
        })
        .await;
    if !joined {
        return reject(tx, send_task, ErrorCode::BadRequest, "Room is no longer available").await;
    }

    tracing::info!(
        session_id = %session_id,
        channel = %channel,
        observer = join.observer,
        "WebSocket client joined"
    );

    // Steady state: translate frames into room commands.
    let mut consented = false;
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str())
            {
                Ok(msg) => {
                    if let Some(command) = client_command(&session_id, msg, &tx) {
                        if !ticket.handle.send(command).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to parse message");
                    let _ = tx.try_send(ServerMessage::Error {
                        code: ErrorCode::ParseError,
                        message: format!("Invalid message format: {e}"),
                    });
                }
            },
            Ok(Message::Ping(_)) => {
                let _ = tx.try_send(ServerMessage::Pong);
            }
            Ok(Message::Close(_)) => {
                consented = true;
                break;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    let _ = ticket
        .handle
        .send(RoomCommand::Leave {
            session_id: session_id.clone(),
            consented,
        })
        .await;
    drop(ticket);
    send_task.abort();

    tracing::info!(session_id = %session_id, "WebSocket connection terminated");
}

struct JoinFrame {
    auth_token: Option<String>,
    channel_id: Option<String>,
    observer: bool,
}

/// Wait for the first text frame and require it to be a join.
async fn read_join(receiver: &mut SplitStream<WebSocket>) -> Option<JoinFrame> {
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Join {
                        auth_token,
                        channel_id,
                        observer,
                    }) => Some(JoinFrame {
                        auth_token,
                        channel_id,
                        observer,
                    }),
                    _ => None,
                };
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            _ => {}
        }
    }
    None
}

/// Send a final error and let the forwarding task drain before closing.
async fn reject(
    tx: mpsc::Sender<ServerMessage>,
    send_task: tokio::task::JoinHandle<()>,
    code: ErrorCode,
    message: &str,
) {
    let _ = tx.try_send(ServerMessage::Error {
        code,
        message: message.to_string(),
    });
    drop(tx);
    let _ = send_task.await;
}

/// Map a wire message onto a room command; protocol-level replies (pong,
/// repeated joins) are answered here without touching the room.
fn client_command(
    session_id: &SessionId,
    msg: ClientMessage,
    tx: &mpsc::Sender<ServerMessage>,
) -> Option<RoomCommand> {
    match msg {
        ClientMessage::Join { .. } => {
            let _ = tx.try_send(ServerMessage::Error {
                code: ErrorCode::BadRequest,
                message: "Already joined".to_string(),
            });
            None
        }
        ClientMessage::Move { x, y } => Some(RoomCommand::Move {
            session_id: session_id.clone(),
            x,
            y,
        }),
        ClientMessage::ChatMessage { text } => Some(RoomCommand::Chat {
            session_id: session_id.clone(),
            text,
        }),
        ClientMessage::PrivateMessage { to, text } => Some(RoomCommand::Direct {
            from: session_id.clone(),
            to,
            text,
        }),
        ClientMessage::UpdatePrompt { prompt } => Some(RoomCommand::UpdatePrompt {
            session_id: session_id.clone(),
            prompt,
        }),
        ClientMessage::Heartbeat => {
            let _ = tx.try_send(ServerMessage::Pong);
            None
        }
    }
}

/// Short alphanumeric id in the transport's own style.
fn generate_session_id() -> SessionId {
    let id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect();
    SessionId::new(id)
}
