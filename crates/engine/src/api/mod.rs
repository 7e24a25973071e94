//! Client-facing transport.

pub mod websocket;
