//! Plaza Engine - server-side session rooms.
//!
//! One room per channel id, each an independent single-writer actor owning
//! its state; WebSocket clients, an external roster store, and an external
//! generation endpoint all feed into the room's serialized command queue.

pub mod api;
pub mod config;
pub mod infrastructure;
pub mod room;
