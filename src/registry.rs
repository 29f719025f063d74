//! Room registry
//!
//! The only state shared between sessions. Maps room names to their members
//! and sessions to the room they are in, both behind one lock so join, leave
//! and broadcast never observe a half-updated room.
//!
//! The lock is never held across a socket write: broadcast copies the
//! member list out and delivers after releasing it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, SendError};
use crate::member::Member;
use crate::message::{Envelope, ServerMessage};
use crate::room::Room;
use crate::types::{RoomName, SessionId};

#[derive(Debug, Default)]
struct RegistryState {
    /// All active rooms: RoomName -> Room
    rooms: HashMap<RoomName, Room>,
    /// Session to room mapping: SessionId -> RoomName
    memberships: HashMap<SessionId, RoomName>,
}

/// Thread-safe room registry
#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member to a room, creating the room if needed
    pub fn join(&self, room_name: RoomName, member: Member) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();

        if state.memberships.contains_key(&member.id) {
            return Err(ProtocolError::AlreadyInRoom);
        }

        let id = member.id;
        match state.rooms.entry(room_name.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().add_member(member);
            }
            Entry::Vacant(entry) => {
                debug!("Room {} created", room_name);
                entry.insert(Room::new(room_name.clone(), member));
            }
        }
        info!("Session {} joined room {}", id, room_name);
        state.memberships.insert(id, room_name);

        debug!(
            "Total rooms: {}, Total members: {}",
            state.rooms.len(),
            state.memberships.len()
        );
        Ok(())
    }

    /// Remove a session from its current room
    ///
    /// Returns the name of the room that was left. The room is deleted when
    /// its last member leaves.
    pub fn leave(&self, id: SessionId) -> Result<RoomName, ProtocolError> {
        let mut state = self.state.lock();

        let Some(room_name) = state.memberships.remove(&id) else {
            return Err(ProtocolError::NoRoomToLeave);
        };

        let should_delete = state
            .rooms
            .get_mut(&room_name)
            .map(|room| room.remove_member(id))
            .unwrap_or(false);

        if should_delete {
            if let Some(room) = state.rooms.remove(&room_name) {
                debug!(
                    "Room {} deleted (empty) after {:?}",
                    room.name,
                    room.created_at.elapsed()
                );
            }
        }

        info!("Session {} left room {}", id, room_name);
        Ok(room_name)
    }

    /// Room the session is currently in, if any
    pub fn current_room(&self, id: SessionId) -> Option<RoomName> {
        self.state.lock().memberships.get(&id).cloned()
    }

    /// Deliver a chat message to every member of its room except `except`
    ///
    /// Each delivery is independent: a full or closed queue is logged and
    /// skipped. Returns the number of members the message was queued for.
    pub fn broadcast(&self, envelope: Envelope, except: SessionId) -> usize {
        let recipients = {
            let state = self.state.lock();
            match state.rooms.get(&envelope.room) {
                Some(room) => room.snapshot(except),
                None => return 0,
            }
        };

        let msg = ServerMessage::Chat(envelope);
        let mut delivered = 0;
        for member in recipients {
            match member.outbox.try_deliver(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(SendError::ChannelFull) => {
                    warn!("Dropping message for slow session {}", member.id);
                }
                Err(SendError::ChannelClosed) => {
                    debug!("Session {} is closing, message not delivered", member.id);
                }
            }
        }
        delivered
    }

    /// Number of members in a room, 0 if it does not exist
    pub fn member_count(&self, room_name: &RoomName) -> usize {
        self.state
            .lock()
            .rooms
            .get(room_name)
            .map(Room::member_count)
            .unwrap_or(0)
    }

    /// Check whether a room currently exists
    pub fn contains_room(&self, room_name: &RoomName) -> bool {
        self.state.lock().rooms.contains_key(room_name)
    }

    /// Number of active rooms
    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }
}
