//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: monotonically allocated per-connection identifier
//! - `RoomName`: name of a chat room as typed by the client
//!
//! Also holds the lifecycle status enums shared by the server and sessions.

use std::fmt;

/// Unique session identifier (newtype pattern)
///
/// Allocated from a counter owned by the server, so ids are never reused
/// within a server run. Ordered so rooms can list members deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Name shown to other room members, e.g. `client-3`
    pub fn client_name(&self) -> String {
        format!("client-{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room name
///
/// Case-sensitive and compared verbatim; surrounding whitespace is removed
/// by the command parser before a name is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomName(pub String);

impl From<&str> for RoomName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for RoomName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server lifecycle status
///
/// Only ever advances in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerStatus {
    NotStarted,
    Starting,
    Started,
    Ending,
    Ended,
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStatus {
    /// Socket open, processing lines
    Active,
    /// Close requested, draining outbound queue
    Closing,
    /// Socket released
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_name() {
        assert_eq!(SessionId(0).client_name(), "client-0");
        assert_eq!(SessionId(42).client_name(), "client-42");
    }

    #[test]
    fn test_room_name_is_case_sensitive() {
        assert_ne!(RoomName::from("Lobby"), RoomName::from("lobby"));
        assert_eq!(RoomName::from("lobby").to_string(), "lobby");
    }

    #[test]
    fn test_status_order_is_forward() {
        assert!(ServerStatus::NotStarted < ServerStatus::Starting);
        assert!(ServerStatus::Started < ServerStatus::Ending);
        assert!(ServerStatus::Ending < ServerStatus::Ended);
        assert!(SessionStatus::Active < SessionStatus::Closed);
    }
}
