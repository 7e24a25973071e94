//! Session rooms: the authoritative state owners.

pub mod actor;
pub mod registry;
pub mod responder;

pub use actor::{Room, RoomCommand, RoomDeps, RoomHandle};
pub use registry::{JoinError, RoomRegistry, RoomTicket, MAX_CLIENTS};
pub use responder::{DelegateResponder, RetryConfig, EXHAUSTED_REPLY, FALLBACK_REPLY};
