//! Authoritative room state.
//!
//! A `RoomState` is owned by exactly one session room and mutated only
//! through the methods here, so the synthetic-participant index can never
//! drift from the participant map. The participant map preserves insertion
//! order; that order is what roster broadcasts show to clients.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::DomainError;
use crate::ids::SessionId;
use crate::participant::{Participant, Position};
use crate::roster::RosterRecord;

/// Result of applying an external update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A live synthetic participant was updated in place.
    Updated,
    /// No live participant matched the record's external id.
    Missing,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    participants: IndexMap<SessionId, Participant>,
    transcript: Vec<String>,
    /// Derived index: session ids backed by a synthetic participant.
    /// Kept atomic with `participants` on every add/update/remove.
    synthetic: HashSet<SessionId>,
    /// Room-wide prompt used for synthetic participants whose record carries
    /// no prompt of its own. Kept for rooms that predate per-record prompts.
    fallback_prompt: String,
}

impl RoomState {
    pub fn new(fallback_prompt: impl Into<String>) -> Self {
        Self {
            participants: IndexMap::new(),
            transcript: Vec::new(),
            synthetic: HashSet::new(),
            fallback_prompt: fallback_prompt.into(),
        }
    }

    /// Insert a participant under its session id. The id must not collide
    /// with any live participant.
    pub fn insert(&mut self, participant: Participant) -> Result<(), DomainError> {
        let session_id = participant.session_id.clone();
        if self.participants.contains_key(&session_id) {
            return Err(DomainError::DuplicateSession(session_id));
        }
        if participant.is_synthetic() {
            self.synthetic.insert(session_id.clone());
        }
        self.participants.insert(session_id, participant);
        Ok(())
    }

    /// Remove a participant. Absent ids are a no-op returning `None`.
    pub fn remove(&mut self, session_id: &str) -> Option<Participant> {
        // shift_remove keeps the remaining insertion order intact.
        let removed = self.participants.shift_remove(session_id);
        if removed.is_some() {
            self.synthetic.remove(session_id);
        }
        removed
    }

    /// Overwrite a live participant's position. Returns false when no
    /// participant owns the id; coordinates are never validated.
    pub fn move_to(&mut self, session_id: &str, position: Position) -> bool {
        match self.participants.get_mut(session_id) {
            Some(participant) => {
                participant.position = position;
                true
            }
            None => false,
        }
    }

    pub fn append_chat(&mut self, text: impl Into<String>) {
        self.transcript.push(text.into());
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn get(&self, session_id: &str) -> Option<&Participant> {
        self.participants.get(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.participants.contains_key(session_id)
    }

    pub fn is_synthetic(&self, session_id: &str) -> bool {
        self.synthetic.contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Session ids in insertion order, the order roster broadcasts use.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.participants.keys().cloned().collect()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Find the live synthetic participant materialized from an external
    /// record.
    pub fn synthetic_session(&self, external_id: i64) -> Option<&SessionId> {
        self.participants
            .values()
            .find(|p| p.external_id() == Some(external_id))
            .map(|p| &p.session_id)
    }

    /// The prompt to hand the delegate responder for a synthetic
    /// participant: its own prompt when non-empty, else the room-wide
    /// fallback. `None` for humans and unknown ids.
    pub fn prompt_for(&self, session_id: &str) -> Option<String> {
        let participant = self.participants.get(session_id)?;
        let prompt = participant.prompt()?;
        if prompt.is_empty() {
            Some(self.fallback_prompt.clone())
        } else {
            Some(prompt.to_string())
        }
    }

    pub fn fallback_prompt(&self) -> &str {
        &self.fallback_prompt
    }

    pub fn set_fallback_prompt(&mut self, prompt: impl Into<String>) {
        self.fallback_prompt = prompt.into();
    }

    /// Materialize an external record as a synthetic participant. Idempotent:
    /// a record whose external id is already live is left untouched and the
    /// injected session id / variant / position are discarded.
    ///
    /// Returns whether a participant was actually created.
    pub fn materialize(
        &mut self,
        record: &RosterRecord,
        session_id: SessionId,
        hero_variant: u8,
        position: Position,
    ) -> Result<bool, DomainError> {
        if self.synthetic_session(record.external_id).is_some() {
            return Ok(false);
        }
        let username = if record.name.is_empty() {
            crate::participant::placeholder_username(&session_id)
        } else {
            record.name.clone()
        };
        let participant = Participant::synthetic(
            session_id,
            username,
            hero_variant,
            position,
            record.prompt.clone().unwrap_or_default(),
            record.external_id,
        )?;
        self.insert(participant)?;
        Ok(true)
    }

    /// Apply an external update: rewrite the matching synthetic participant's
    /// username and prompt in place. Position is never touched.
    pub fn apply_update(&mut self, record: &RosterRecord) -> UpdateOutcome {
        let Some(session_id) = self.synthetic_session(record.external_id).cloned() else {
            return UpdateOutcome::Missing;
        };
        if let Some(participant) = self.participants.get_mut(&session_id) {
            if !record.name.is_empty() {
                participant.username = record.name.clone();
            }
            if let crate::participant::ParticipantKind::Synthetic { prompt, .. } =
                &mut participant.kind
            {
                *prompt = record.prompt.clone().unwrap_or_default();
            }
        }
        UpdateOutcome::Updated
    }

    /// Apply an external delete, removing the matching synthetic participant
    /// from the map and the synthetic index together. Unknown external ids
    /// return `None`.
    pub fn apply_delete(&mut self, external_id: i64) -> Option<Participant> {
        let session_id = self.synthetic_session(external_id).cloned()?;
        self.remove(session_id.as_str())
    }
}
