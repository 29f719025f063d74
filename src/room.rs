//! Room struct definition
//!
//! Represents a named chat room and its current members.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::member::Member;
use crate::types::{RoomName, SessionId};

/// Chat room
///
/// Holds members keyed by session id, so each session appears at most once.
/// A room is only kept by the registry while it has at least one member.
#[derive(Debug)]
pub struct Room {
    /// Room name for identification
    pub name: RoomName,
    /// Current members
    members: BTreeMap<SessionId, Member>,
    /// Room creation time
    pub created_at: Instant,
}

impl Room {
    /// Create a new room with its first member
    pub fn new(name: RoomName, first: Member) -> Self {
        let mut members = BTreeMap::new();
        members.insert(first.id, first);
        Self {
            name,
            members,
            created_at: Instant::now(),
        }
    }

    /// Check if room has no members left
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a session is in this room
    pub fn contains(&self, id: SessionId) -> bool {
        self.members.contains_key(&id)
    }

    /// Add a member
    ///
    /// Returns false if the session was already a member.
    pub fn add_member(&mut self, member: Member) -> bool {
        if self.contains(member.id) {
            return false;
        }
        self.members.insert(member.id, member);
        true
    }

    /// Remove a member
    ///
    /// Returns true if the room should be deleted (no members left).
    pub fn remove_member(&mut self, id: SessionId) -> bool {
        self.members.remove(&id);
        self.members.is_empty()
    }

    /// Get the number of members in the room
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Point-in-time copy of every member except `except`
    pub fn snapshot(&self, except: SessionId) -> Vec<Member> {
        self.members
            .values()
            .filter(|m| m.id != except)
            .cloned()
            .collect()
    }
}
