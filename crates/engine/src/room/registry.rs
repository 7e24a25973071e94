//! Cross-room registry and capacity enforcement.
//!
//! Rooms are keyed by channel id and fully independent. Capacity is enforced
//! here, before a join command ever reaches a room's queue: a rejected
//! connection never creates a participant. Slot reservations are RAII so a
//! disconnect on any path gives the seat back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::room::actor::{Room, RoomDeps, RoomHandle};

/// Maximum concurrent non-observer clients per room.
pub const MAX_CLIENTS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Room is at capacity")]
    RoomFull,
}

struct RoomEntry {
    handle: RoomHandle,
    occupancy: Arc<AtomicUsize>,
}

/// Admission ticket: the room's address plus, for non-observers, the held
/// capacity slot.
pub struct RoomTicket {
    pub handle: RoomHandle,
    _slot: Option<SlotGuard>,
}

/// Releases one capacity slot on drop.
struct SlotGuard {
    occupancy: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.occupancy.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomEntry>>,
    deps: RoomDeps,
}

impl RoomRegistry {
    pub fn new(deps: RoomDeps) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            deps,
        }
    }

    /// Get or create the room for a channel and reserve a seat in it.
    /// Observers take no seat. Fails with `RoomFull` at capacity.
    pub fn checkout(&self, channel: &str, observer: bool) -> Result<RoomTicket, JoinError> {
        loop {
            let (handle, occupancy) = {
                let entry = self
                    .rooms
                    .entry(channel.to_string())
                    .or_insert_with(|| self.spawn_room(channel));
                (entry.handle.clone(), entry.occupancy.clone())
            };

            // A room disposes itself when its last client leaves; a stale
            // entry here just means we recreate it.
            if handle.is_closed() {
                self.rooms
                    .remove_if(channel, |_, entry| entry.handle.is_closed());
                continue;
            }

            if observer {
                return Ok(RoomTicket {
                    handle,
                    _slot: None,
                });
            }

            let reserved = occupancy
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n < MAX_CLIENTS {
                        Some(n + 1)
                    } else {
                        None
                    }
                })
                .is_ok();
            if !reserved {
                return Err(JoinError::RoomFull);
            }

            return Ok(RoomTicket {
                handle,
                _slot: Some(SlotGuard { occupancy }),
            });
        }
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.rooms.contains_key(channel)
    }

    fn spawn_room(&self, channel: &str) -> RoomEntry {
        let (handle, room) = Room::new(channel.to_string(), self.deps.clone());
        let rooms = self.rooms.clone();
        let key = channel.to_string();
        tokio::spawn(async move {
            room.run().await;
            rooms.remove(&key);
        });
        RoomEntry {
            handle,
            occupancy: Arc::new(AtomicUsize::new(0)),
        }
    }
}
