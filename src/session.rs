//! Client session
//!
//! One session per accepted connection. The session task reads lines,
//! applies them to the registry and queues replies; a separate writer task
//! owns the write half of the socket and drains the outbound queue.
//!
//! ```text
//! Active ──exit/shutdown──▶ Closing ──writer done──▶ Closed
//!    └──────────read/write error, peer gone─────────────▲
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ProtocolError, SendError, SessionError};
use crate::member::{Member, Outbound, Outbox};
use crate::message::{ClientCommand, Envelope, ErrorCode, ServerMessage};
use crate::registry::Registry;
use crate::types::{SessionId, SessionStatus};

/// Why the read loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    /// Client sent `exit`
    ClientExit,
    /// Server asked the session to exit
    ServerExit,
    /// Peer closed the connection
    Disconnected,
    /// Read or write failed
    Transport,
}

/// What to do after handling one line
enum Flow {
    Continue,
    /// Client sent `exit`
    Exit,
    /// Exit was requested while waiting to queue a reply
    ServerExit,
}

/// Server-side handle to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    exit: CancellationToken,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.status() == SessionStatus::Closed
    }

    /// Ask the session to exit
    ///
    /// An `Active` session sends the shutdown notice, leaves its room and
    /// closes its socket. Has no effect on a session already closing.
    pub fn exit(&self) {
        self.exit.cancel();
    }

    /// Wait until the session reaches `Closed`
    pub async fn closed(&self) {
        let mut status = self.status.clone();
        let _ = status.wait_for(|s| *s == SessionStatus::Closed).await;
    }
}

/// Per-connection session state
pub struct Session {
    id: SessionId,
    registry: Arc<Registry>,
    status: watch::Sender<SessionStatus>,
    exit: CancellationToken,
    max_line_length: usize,
    outbound_buffer: usize,
    close_timeout: Duration,
}

impl Session {
    /// Create a session and the handle the server keeps for it
    pub fn new(id: SessionId, registry: Arc<Registry>, config: &ServerConfig) -> (Self, SessionHandle) {
        let (status, status_rx) = watch::channel(SessionStatus::Active);
        let exit = CancellationToken::new();
        let handle = SessionHandle {
            id,
            exit: exit.clone(),
            status: status_rx,
        };
        let session = Self {
            id,
            registry,
            status,
            exit,
            max_line_length: config.max_line_length,
            outbound_buffer: config.outbound_buffer,
            close_timeout: config.close_timeout,
        };
        (session, handle)
    }

    /// Drive the session until it is closed
    pub async fn run<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(self.max_line_length));
        let (sink, mut lines) = framed.split();

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_buffer);
        let member = Member::new(self.id, Outbox::new(outbound_tx));

        let write_failed = CancellationToken::new();
        let writer = tokio::spawn(write_loop(self.id, sink, outbound_rx, write_failed.clone()));

        info!("Session {} ({}) started", self.id, member.name);

        // The codec yields a single `None` right after reporting an error,
        // then resumes reading.
        let mut after_codec_error = false;

        let ending = loop {
            tokio::select! {
                _ = self.exit.cancelled() => break Ending::ServerExit,
                _ = write_failed.cancelled() => break Ending::Transport,
                next = lines.next() => {
                    let flow = match next {
                        Some(Ok(line)) => {
                            after_codec_error = false;
                            self.handle_line(&member, &line).await
                        }
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                            after_codec_error = true;
                            debug!("Session {} sent an over-long line", self.id);
                            self.reply(&member, ProtocolError::LineTooLong).await
                        }
                        Some(Err(e)) => {
                            warn!("Session {} read error: {}", self.id, SessionError::from(e));
                            break Ending::Transport;
                        }
                        None if after_codec_error => {
                            after_codec_error = false;
                            Ok(Flow::Continue)
                        }
                        None => break Ending::Disconnected,
                    };
                    match flow {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Exit) => break Ending::ClientExit,
                        Ok(Flow::ServerExit) => break Ending::ServerExit,
                        Err(e) => {
                            warn!("Session {} reply failed: {}", self.id, e);
                            break Ending::Transport;
                        }
                    }
                }
            }
        };

        self.close(&member, ending, writer).await;
        drop(lines);
        info!("Session {} closed ({:?})", self.id, ending);
    }

    /// Apply one inbound line
    async fn handle_line(&self, member: &Member, line: &str) -> Result<Flow, SessionError> {
        let command = match ClientCommand::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(Flow::Continue),
            Err(e) => return self.reply(member, e).await,
        };

        match command {
            ClientCommand::Enter(room) => {
                if let Err(e) = self.registry.join(room, member.clone()) {
                    return self.reply(member, e).await;
                }
            }
            ClientCommand::Leave => {
                if let Err(e) = self.registry.leave(self.id) {
                    return self.reply(member, e).await;
                }
            }
            ClientCommand::Exit => return Ok(Flow::Exit),
            ClientCommand::Say(body) => match self.registry.current_room(self.id) {
                Some(room) => {
                    let envelope = Envelope {
                        room,
                        sender: member.name.clone(),
                        body,
                    };
                    let delivered = self.registry.broadcast(envelope, self.id);
                    debug!("Session {} message delivered to {} members", self.id, delivered);
                }
                None => return self.reply(member, ProtocolError::NeedRoomToPost).await,
            },
        }
        Ok(Flow::Continue)
    }

    /// Queue an error reply, giving up if exit is requested meanwhile
    ///
    /// A peer that never reads fills the queue, so the wait for space must
    /// not shadow an exit request.
    async fn reply(&self, member: &Member, err: ProtocolError) -> Result<Flow, SessionError> {
        tokio::select! {
            sent = member.outbox.send(Outbound::Line(err.into())) => {
                sent?;
                Ok(Flow::Continue)
            }
            _ = self.exit.cancelled() => Ok(Flow::ServerExit),
        }
    }

    /// Run the close sequence for the given ending
    async fn close(&self, member: &Member, ending: Ending, writer: JoinHandle<()>) {
        match ending {
            Ending::ClientExit | Ending::ServerExit => {
                self.set_status(SessionStatus::Closing);
                self.leave_quietly();
                self.finish_writer(member, ending, writer).await;
            }
            Ending::Disconnected => {
                // Replies to lines read before EOF are still flushed.
                self.leave_quietly();
                self.finish_writer(member, ending, writer).await;
            }
            Ending::Transport => {
                self.leave_quietly();
                writer.abort();
                let _ = writer.await;
            }
        }
        self.set_status(SessionStatus::Closed);
    }

    /// Queue the last item and wait for the writer to flush and shut down
    ///
    /// The shutdown notice is never waited on: if the queue is full the
    /// socket is dropped at once. The whole sequence is bounded by
    /// `close_timeout`, after which the writer is aborted.
    async fn finish_writer(&self, member: &Member, ending: Ending, mut writer: JoinHandle<()>) {
        let queued = if ending == Ending::ServerExit {
            member
                .outbox
                .try_send(Outbound::Line(ServerMessage::Error(ErrorCode::ServerExiting)))
        } else {
            tokio::time::timeout(self.close_timeout, member.outbox.send(Outbound::Close))
                .await
                .unwrap_or(Err(SendError::ChannelFull))
        };

        let finished = match queued {
            Err(SendError::ChannelFull) => {
                warn!("Session {} outbound queue full, dropping connection", self.id);
                false
            }
            Ok(()) | Err(SendError::ChannelClosed) => {
                match tokio::time::timeout(self.close_timeout, &mut writer).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!("Session {} writer task failed: {}", self.id, e);
                        true
                    }
                    Err(_) => {
                        warn!(
                            "Session {} writer still busy after {:?}, dropping connection",
                            self.id, self.close_timeout
                        );
                        false
                    }
                }
            }
        };

        if !finished {
            writer.abort();
            let _ = writer.await;
        }
    }

    /// Leave the current room if there is one
    fn leave_quietly(&self) {
        if let Ok(room) = self.registry.leave(self.id) {
            debug!("Session {} removed from room {} on close", self.id, room);
        }
    }

    fn set_status(&self, status: SessionStatus) {
        debug!("Session {} -> {:?}", self.id, status);
        self.status.send_replace(status);
    }
}

/// Drain the outbound queue into the socket
///
/// Stops after a close marker or a final line, then shuts the write half down.
async fn write_loop<S>(
    id: SessionId,
    mut sink: SplitSink<Framed<S, LinesCodec>, String>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    write_failed: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(item) = outbound_rx.recv().await {
        let msg = match item {
            Outbound::Line(msg) => msg,
            Outbound::Close => break,
        };
        if let Err(e) = sink.send(msg.to_string()).await {
            debug!("Session {} write failed: {}", id, e);
            write_failed.cancel();
            return;
        }
        if msg.is_final() {
            break;
        }
    }
    debug!("Write task ended for session {}", id);

    let _ = sink.close().await;
}
