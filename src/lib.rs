//! Line-based TCP Chat Server Library
//!
//! Clients connect over TCP, join a named room and exchange text lines
//! broadcast to the other occupants of that room.
//!
//! # Features
//! - One session task per connection, with its own writer task
//! - Rooms created on first join and deleted on last leave
//! - Best-effort fan-out that never blocks on a slow reader
//! - Cancellation-driven shutdown that tells every client why it is dropped
//!
//! # Architecture
//! - `Server` owns the listener, runs the accept loop and drives the
//!   `NotStarted → Starting → Started → Ending → Ended` lifecycle
//! - `Session` parses the line protocol and talks to the shared `Registry`
//! - `Registry` is the only shared state, guarded by a single lock that is
//!   never held across a socket write
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use line_chat_server::{Server, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let server = Arc::new(Server::new(config.clone()));
//!     let cancel = CancellationToken::new();
//!
//!     server.start(config.address, config.port, cancel).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod member;
pub mod message;
pub mod registry;
pub mod room;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::ServerConfig;
pub use error::{ProtocolError, SendError, ServerError, SessionError};
pub use member::{Member, Outbound, Outbox};
pub use message::{ClientCommand, Envelope, ErrorCode, ServerMessage};
pub use registry::Registry;
pub use room::Room;
pub use server::Server;
pub use session::{Session, SessionHandle};
pub use types::{RoomName, ServerStatus, SessionId, SessionStatus};
