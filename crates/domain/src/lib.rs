//! Core domain types for the plaza session server.
//!
//! Everything here is pure data: no I/O, no async, no randomness. Randomized
//! values (hero variants, spawn positions, synthetic session ids) are
//! produced by the engine and injected through constructors.

pub mod error;
pub mod ids;
pub mod participant;
pub mod room_state;
pub mod roster;

pub use error::DomainError;
pub use ids::SessionId;
pub use participant::{Participant, ParticipantKind, Position, HERO_VARIANTS};
pub use room_state::{RoomState, UpdateOutcome};
pub use roster::{RosterEvent, RosterRecord};
