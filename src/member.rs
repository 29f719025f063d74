//! Room member definition
//!
//! A member is the registry-facing view of a session: its id, display name,
//! and the sending half of its outbound queue.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::SessionId;

/// Registry-facing view of a session
#[derive(Debug, Clone)]
pub struct Member {
    pub id: SessionId,
    pub name: String,
    pub outbox: Outbox,
}

impl Member {
    pub fn new(id: SessionId, outbox: Outbox) -> Self {
        Self {
            id,
            name: id.client_name(),
            outbox,
        }
    }
}

/// Item on a session's outbound queue
#[derive(Debug)]
pub enum Outbound {
    /// Line to write to the socket
    Line(ServerMessage),
    /// Stop the writer and shut the socket down
    Close,
}

/// Sending half of a session's outbound queue
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<Outbound>,
}

impl Outbox {
    pub fn new(sender: mpsc::Sender<Outbound>) -> Self {
        Self { sender }
    }

    /// Queue an item, waiting for space
    ///
    /// Used by the owning session for its own replies.
    pub async fn send(&self, item: Outbound) -> Result<(), SendError> {
        self.sender
            .send(item)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Queue an item without waiting
    pub fn try_send(&self, item: Outbound) -> Result<(), SendError> {
        self.sender.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Queue a line without waiting
    ///
    /// Used for fan-out so a slow reader never stalls the sender.
    pub fn try_deliver(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.try_send(Outbound::Line(msg))
    }
}
