//! Records and change events from the external configuration store.

use serde::{Deserialize, Serialize};

/// One record in the external store: a synthetic participant's identity and
/// behavioral prompt. `external_id` is the join key between live participants
/// and the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRecord {
    pub external_id: i64,
    pub name: String,
    pub prompt: Option<String>,
}

/// A change-feed notification. Delivery is at-least-once and order is
/// unspecified: duplicate inserts and events for unknown ids must be
/// tolerated by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RosterEvent {
    Insert(RosterRecord),
    Update(RosterRecord),
    Delete { external_id: i64 },
}
