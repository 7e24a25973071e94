//! Participants and their 2D positions.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::SessionId;

/// Number of avatar sprite variants the clients ship with.
pub const HERO_VARIANTS: u8 = 12;

/// A 2D position inside the room. Updates are unconditional: the room trusts
/// whatever coordinates a client declares for its own participant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// What backs a participant: a connected client, or a server-materialized
/// entity whose replies come from the delegate responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParticipantKind {
    Human,
    Synthetic { prompt: String, external_id: i64 },
}

/// An entity with identity and a position inside a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub session_id: SessionId,
    pub username: String,
    pub hero_variant: u8,
    pub position: Position,
    pub kind: ParticipantKind,
}

impl Participant {
    /// A client-backed participant, created on join and removed on leave.
    pub fn human(
        session_id: SessionId,
        username: String,
        hero_variant: u8,
        position: Position,
    ) -> Result<Self, DomainError> {
        check_hero_variant(hero_variant)?;
        Ok(Self {
            session_id,
            username,
            hero_variant,
            position,
            kind: ParticipantKind::Human,
        })
    }

    /// A server-materialized participant backed by an external roster record.
    /// Its position is fixed at creation and never moves afterwards.
    pub fn synthetic(
        session_id: SessionId,
        username: String,
        hero_variant: u8,
        position: Position,
        prompt: String,
        external_id: i64,
    ) -> Result<Self, DomainError> {
        check_hero_variant(hero_variant)?;
        Ok(Self {
            session_id,
            username,
            hero_variant,
            position,
            kind: ParticipantKind::Synthetic {
                prompt,
                external_id,
            },
        })
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.kind, ParticipantKind::Synthetic { .. })
    }

    /// The behavioral prompt of a synthetic participant, if it has one.
    pub fn prompt(&self) -> Option<&str> {
        match &self.kind {
            ParticipantKind::Synthetic { prompt, .. } => Some(prompt.as_str()),
            ParticipantKind::Human => None,
        }
    }

    pub fn external_id(&self) -> Option<i64> {
        match self.kind {
            ParticipantKind::Synthetic { external_id, .. } => Some(external_id),
            ParticipantKind::Human => None,
        }
    }
}

/// Username shown for participants that did not bring their own.
pub fn placeholder_username(session_id: &SessionId) -> String {
    format!("#User {session_id}")
}

fn check_hero_variant(variant: u8) -> Result<(), DomainError> {
    if (1..=HERO_VARIANTS).contains(&variant) {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "hero variant {variant} outside 1..={HERO_VARIANTS}"
        )))
    }
}
