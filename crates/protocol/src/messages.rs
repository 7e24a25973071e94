//! WebSocket message types for client-engine communication.
//!
//! Used by both sides: the engine receives `ClientMessage` and sends
//! `ServerMessage`. Wire names are snake_case to stay compatible with the
//! deployed clients.

use serde::{Deserialize, Serialize};

// =============================================================================
// Client Messages (client → engine)
// =============================================================================

/// Messages from a connected client to the session server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame on every connection. Observers (e.g. an external editor
    /// session) register without creating a participant.
    Join {
        #[serde(default)]
        auth_token: Option<String>,
        #[serde(default)]
        channel_id: Option<String>,
        #[serde(default)]
        observer: bool,
    },
    /// Move own avatar. Coordinates are taken as-is.
    Move { x: f64, y: f64 },
    /// Say something to the whole room.
    ChatMessage { text: String },
    /// Say something to one participant. The recipient field kept its old
    /// spellings from two client generations.
    PrivateMessage {
        #[serde(alias = "sendPlayerId", alias = "userId")]
        to: String,
        text: String,
    },
    /// Editor-only: overwrite the room-wide fallback prompt.
    UpdatePrompt { prompt: String },
    /// Keepalive.
    Heartbeat,
}

// =============================================================================
// Server Messages (engine → client)
// =============================================================================

/// Messages from the session server to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a successful join, carrying the allocated session id.
    Joined { session_id: String, observer: bool },
    /// Current session ids, broadcast after every join/leave and roster
    /// change, in participant insertion order.
    PlayerList { players: Vec<String> },
    /// A room-wide chat line.
    ChatMessage { user: String, text: String },
    /// A directed message, delivered only to its recipient (or, for replies
    /// from a synthetic participant, back to the asking client).
    PrivateMessage { user: String, text: String },
    /// Full participant snapshot, broadcast after every state mutation.
    StateSync { participants: Vec<ParticipantInfo> },
    /// Keepalive reply.
    Pong,
    /// Join rejection or malformed traffic.
    Error { code: ErrorCode, message: String },
}

/// One participant as clients see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub session_id: String,
    pub username: String,
    pub hero_variant: u8,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthRejected,
    RoomFull,
    ParseError,
    BadRequest,
}
