//! Line protocol definitions
//!
//! Every message is one UTF-8 line. Inbound lines are classified into a
//! `ClientCommand`; outbound lines are rendered from a `ServerMessage`.
//!
//! Client → server:
//!
//! ```text
//! enter <room>   join <room> (silent on success)
//! leave          leave the current room (silent on success)
//! exit           leave the current room and disconnect
//! <anything>     chat message for the current room
//! ```
//!
//! Server → client:
//!
//! ```text
//! [<room>]<sender> says '<message>'
//! [Error: <text>]
//! ```

use std::fmt;

use crate::error::ProtocolError;
use crate::types::RoomName;

const ENTER: &str = "enter";
const LEAVE: &str = "leave";
const EXIT: &str = "exit";

/// Client → Server command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Join a room, creating it if needed
    Enter(RoomName),
    /// Leave the current room
    Leave,
    /// Leave the current room and close the connection
    Exit,
    /// Chat message for the current room
    Say(String),
}

impl ClientCommand {
    /// Classify one inbound line
    ///
    /// Returns `Ok(None)` for blank lines, which are ignored.
    pub fn parse(line: &str) -> Result<Option<Self>, ProtocolError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let command = match trimmed {
            LEAVE => Self::Leave,
            EXIT => Self::Exit,
            ENTER => return Err(ProtocolError::MissingRoomName),
            _ => match trimmed.strip_prefix(ENTER) {
                Some(rest) if rest.starts_with(char::is_whitespace) => {
                    Self::Enter(RoomName::from(rest.trim()))
                }
                _ => Self::Say(line.trim_end_matches(['\r', '\n']).to_string()),
            },
        };
        Ok(Some(command))
    }
}

/// A chat message addressed to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub room: RoomName,
    pub sender: String,
    pub body: String,
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Chat message from another room member
    Chat(Envelope),
    /// Error reply
    Error(ErrorCode),
}

impl ServerMessage {
    /// Whether the connection is closed right after this line
    pub fn is_final(&self) -> bool {
        matches!(self, ServerMessage::Error(ErrorCode::ServerExiting))
    }
}

/// Error codes for `ServerMessage::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Chat message sent outside any room
    NeedRoomToPost,
    /// `leave` sent outside any room
    NoRoomToLeave,
    /// `enter` sent while already inside a room
    AlreadyInRoom,
    /// `enter` sent without a room name
    MissingRoomName,
    /// Inbound line over the length limit
    LineTooLong,
    /// Server shutdown notice, the last line a client receives
    ServerExiting,
}

impl ErrorCode {
    pub fn text(&self) -> &'static str {
        match self {
            ErrorCode::NeedRoomToPost => "Need to be inside a room to post a message",
            ErrorCode::NoRoomToLeave => "There is no room to leave from",
            ErrorCode::AlreadyInRoom => "Already inside a room, leave it first",
            ErrorCode::MissingRoomName => "Room name is required",
            ErrorCode::LineTooLong => "Message is too long",
            ErrorCode::ServerExiting => "Server is exiting",
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Chat(envelope) => write!(
                f,
                "[{}]{} says '{}'",
                envelope.room, envelope.sender, envelope.body
            ),
            ServerMessage::Error(code) => write!(f, "[Error: {}]", code.text()),
        }
    }
}

/// Convert ProtocolError to ServerMessage for client notification
impl From<ProtocolError> for ServerMessage {
    fn from(err: ProtocolError) -> Self {
        let code = match err {
            ProtocolError::AlreadyInRoom => ErrorCode::AlreadyInRoom,
            ProtocolError::NoRoomToLeave => ErrorCode::NoRoomToLeave,
            ProtocolError::NeedRoomToPost => ErrorCode::NeedRoomToPost,
            ProtocolError::MissingRoomName => ErrorCode::MissingRoomName,
            ProtocolError::LineTooLong => ErrorCode::LineTooLong,
        };
        ServerMessage::Error(code)
    }
}
