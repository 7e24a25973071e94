//! Wire protocol shared by the engine and its clients.
//!
//! Everything on the WebSocket is JSON with a `type` tag; the tag values are
//! the snake_case message names the deployed clients already speak.

pub mod messages;

pub use messages::{ClientMessage, ErrorCode, ParticipantInfo, ServerMessage};
