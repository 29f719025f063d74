//! Error types for the chat server
//!
//! Lifecycle errors surface to the caller of `Server::start`, protocol errors
//! are reported to the offending client as a reply line, and transport errors
//! end a single session. Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Server lifecycle errors
///
/// Fatal to the call that raised them, never to the process.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called on a server that is no longer `NotStarted`
    #[error("Server has already started")]
    AlreadyStarted,

    /// `stop` was triggered before the server was started
    #[error("Server has not started")]
    NotStarted,

    /// `stop` found no bound listener
    #[error("Unexpected state: listener is not set")]
    InvalidState,

    /// Binding the listener failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol errors
///
/// Session-local and recoverable: the session replies with the matching
/// error line and keeps processing input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// `enter` while already inside a room
    #[error("Already in room")]
    AlreadyInRoom,

    /// `leave` while not inside a room
    #[error("No room to leave")]
    NoRoomToLeave,

    /// Chat message while not inside a room
    #[error("Need a room to post")]
    NeedRoomToPost,

    /// `enter` without a room name
    #[error("Missing room name")]
    MissingRoomName,

    /// Inbound line exceeded the configured maximum length
    #[error("Line too long")]
    LineTooLong,
}

/// Outbound queue errors
#[derive(Debug, Error)]
pub enum SendError {
    /// The session's writer task is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// The session's outbound queue has no free slot
    #[error("Channel full")]
    ChannelFull,
}

/// Transport errors on a session's socket
///
/// Any of these ends the session that hit it.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading or framing an inbound line failed
    #[error("Codec error: {0}")]
    Codec(#[from] LinesCodecError),

    /// The writer task stopped, so replies can no longer be delivered
    #[error("Outbound channel error: {0}")]
    Send(#[from] SendError),
}
