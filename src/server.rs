//! Server lifecycle and accept loop
//!
//! Owns the listening socket, hands every accepted connection to its own
//! session task and, once the cancellation signal fires, asks every tracked
//! session to exit.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::Registry;
use crate::session::{Session, SessionHandle};
use crate::types::{ServerStatus, SessionId};

/// Chat server
///
/// `start` may be called at most once per instance; status only moves
/// forward from `NotStarted` to `Ended`.
pub struct Server {
    config: ServerConfig,
    status: watch::Sender<ServerStatus>,
    registry: Arc<Registry>,
    next_session_id: AtomicU64,
    /// Cancelled by `stop` to close the listener
    listener_closed: Mutex<Option<CancellationToken>>,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Sessions in accept order
    sessions: Mutex<Vec<SessionHandle>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (status, _) = watch::channel(ServerStatus::NotStarted);
        Self {
            config,
            status,
            registry: Arc::new(Registry::new()),
            next_session_id: AtomicU64::new(0),
            listener_closed: Mutex::new(None),
            local_addr: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Number of tracked sessions that are not yet closed
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().iter().filter(|s| !s.is_closed()).count()
    }

    /// Bind, accept connections until `cancel` fires, then end
    ///
    /// Returns once the server is `Ended`. Fails with `AlreadyStarted`
    /// without touching the running server if called a second time.
    pub async fn start(
        self: &Arc<Self>,
        address: IpAddr,
        port: u16,
        cancel: CancellationToken,
    ) -> Result<(), ServerError> {
        let claimed = self.status.send_if_modified(|status| {
            if *status == ServerStatus::NotStarted {
                *status = ServerStatus::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            // Can be started at most once
            return Err(ServerError::AlreadyStarted);
        }
        info!("Starting");

        let listener = match TcpListener::bind(SocketAddr::new(address, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind {}:{}: {}", address, port, e);
                self.advance(ServerStatus::Ended);
                return Err(ServerError::Io(e));
            }
        };
        *self.local_addr.lock() = listener.local_addr().ok();

        let listener_closed = CancellationToken::new();
        *self.listener_closed.lock() = Some(listener_closed.clone());
        self.advance(ServerStatus::Started);
        info!("Listening on {}", self.local_addr().map_or_else(|| "?".into(), |a| a.to_string()));

        let server = Arc::clone(self);
        let watcher = tokio::spawn(async move {
            cancel.cancelled().await;
            info!("Stopping the server");
            if let Err(e) = server.stop() {
                error!("Failed to stop: {}", e);
            }
        });

        self.accept_loop(listener, listener_closed).await;
        watcher.abort();
        Ok(())
    }

    /// Close the listener so the accept loop ends
    fn stop(&self) -> Result<(), ServerError> {
        if self.status() == ServerStatus::NotStarted {
            error!("Server has not started");
            return Err(ServerError::NotStarted);
        }

        let Some(listener_closed) = self.listener_closed.lock().clone() else {
            error!("Unexpected state: listener is not set");
            return Err(ServerError::InvalidState);
        };

        info!("Changing server status and stopping the listener");
        self.advance(ServerStatus::Ending);
        listener_closed.cancel();
        info!("Listener stopped");
        Ok(())
    }

    async fn accept_loop(&self, listener: TcpListener, listener_closed: CancellationToken) {
        info!("Accept loop started");

        while self.status() == ServerStatus::Started {
            debug!("Waiting for client");
            tokio::select! {
                _ = listener_closed.cancelled() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
                        info!("New client accepted 'client-{}' from {}", id, peer);

                        let (session, handle) = Session::new(id, Arc::clone(&self.registry), &self.config);
                        tokio::spawn(session.run(stream));

                        let mut sessions = self.sessions.lock();
                        sessions.retain(|s| !s.is_closed());
                        sessions.push(handle);
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}, continuing...", e);
                        pause_after_accept_error(self.config.accept_backoff, &listener_closed).await;
                    }
                },
            }
        }
        drop(listener);

        let sessions = self.sessions.lock().clone();
        info!("Asking {} sessions to exit, before ending accept loop", sessions.len());
        for session in &sessions {
            if !session.is_closed() {
                debug!("Asking session {} to exit", session.id());
            }
            session.exit();
        }

        info!("Accept loop ending");
        self.advance(ServerStatus::Ended);
    }

    /// Wait up to `timeout` for every tracked session to close
    ///
    /// Returns true if all sessions closed in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let sessions = self.sessions.lock().clone();
        let all_closed = join_all(sessions.iter().map(SessionHandle::closed));
        match tokio::time::timeout(timeout, all_closed).await {
            Ok(_) => true,
            Err(_) => {
                warn!("{} sessions still open after {:?}", self.active_sessions(), timeout);
                false
            }
        }
    }

    /// Move status forward, never backward
    fn advance(&self, next: ServerStatus) {
        self.status.send_if_modified(|status| {
            if *status < next {
                debug!("Server status {:?} -> {:?}", *status, next);
                *status = next;
                true
            } else {
                false
            }
        });
    }
}

/// Back off after a failed accept so a persistent error such as EMFILE
/// does not spin the loop. Returns early if the listener is closed.
async fn pause_after_accept_error(backoff: Duration, listener_closed: &CancellationToken) {
    tokio::select! {
        _ = listener_closed.cancelled() => {}
        _ = tokio::time::sleep(backoff) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::types::RoomName;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const REPS: usize = 16;

    struct TestClient {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();
            Self {
                lines: BufReader::new(read).lines(),
                writer,
            }
        }

        async fn write_line(&mut self, line: &str) {
            self.writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        }

        async fn read_line(&mut self) -> Option<String> {
            tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("timed out waiting for a line")
                .unwrap()
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    async fn start_server() -> (Arc<Server>, CancellationToken, JoinHandle<Result<(), ServerError>>) {
        let server = Arc::new(Server::new(ServerConfig::default()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            let cancel = cancel.clone();
            async move { server.start(LOCALHOST, 0, cancel).await }
        });
        let mut status = server.subscribe();
        status
            .wait_for(|s| *s >= ServerStatus::Started)
            .await
            .unwrap();
        (server, cancel, task)
    }

    #[tokio::test]
    async fn test_two_clients_chat_in_a_room() {
        let (server, cancel, task) = start_server().await;
        let addr = server.local_addr().unwrap();
        let room = RoomName::from("room");

        let mut client0 = TestClient::connect(addr).await;
        let mut client1 = TestClient::connect(addr).await;
        client0.write_line("enter room").await;
        client1.write_line("enter room").await;
        wait_until(|| server.registry().member_count(&room) == 2).await;

        for i in 0..REPS {
            client0.write_line(&format!("Hello from client0 {i}")).await;
            client1.write_line(&format!("Hello from client1 {i}")).await;
            assert_eq!(
                client0.read_line().await,
                Some(format!("[room]client-1 says 'Hello from client1 {i}'"))
            );
            assert_eq!(
                client1.read_line().await,
                Some(format!("[room]client-0 says 'Hello from client0 {i}'"))
            );
        }

        client0.write_line("leave").await;
        client1.write_line("leave").await;
        wait_until(|| !server.registry().contains_room(&room)).await;

        cancel.cancel();
        assert_eq!(client1.read_line().await.as_deref(), Some("[Error: Server is exiting]"));
        assert_eq!(client1.read_line().await, None);
        assert_eq!(client0.read_line().await.as_deref(), Some("[Error: Server is exiting]"));

        task.await.unwrap().unwrap();
        assert_eq!(server.status(), ServerStatus::Ended);
    }

    #[tokio::test]
    async fn test_client_writes_outside_room() {
        let (server, cancel, task) = start_server().await;
        let addr = server.local_addr().unwrap();

        let mut client0 = TestClient::connect(addr).await;
        let mut client1 = TestClient::connect(addr).await;
        let msg = "[Error: Need to be inside a room to post a message]";
        for i in 0..REPS {
            client0.write_line(&format!("Hello from client0 {i}")).await;
            client1.write_line(&format!("Hello from client1 {i}")).await;
            assert_eq!(client0.read_line().await.as_deref(), Some(msg));
            assert_eq!(client1.read_line().await.as_deref(), Some(msg));
        }

        let msg = "[Error: There is no room to leave from]";
        client0.write_line("leave").await;
        client1.write_line("leave").await;
        assert_eq!(client0.read_line().await.as_deref(), Some(msg));
        assert_eq!(client1.read_line().await.as_deref(), Some(msg));

        client0.write_line("exit").await;
        assert_eq!(client0.read_line().await, None);

        cancel.cancel();
        assert_eq!(client1.read_line().await.as_deref(), Some("[Error: Server is exiting]"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_notifies_client_in_room_once() {
        let (server, cancel, task) = start_server().await;
        let mut client = TestClient::connect(server.local_addr().unwrap()).await;
        client.write_line("enter room").await;
        wait_until(|| server.registry().contains_room(&"room".into())).await;

        cancel.cancel();
        assert_eq!(client.read_line().await.as_deref(), Some("[Error: Server is exiting]"));
        assert_eq!(client.read_line().await, None);

        task.await.unwrap().unwrap();
        assert!(server.drain(Duration::from_secs(5)).await);
        assert_eq!(server.registry().room_count(), 0);
        assert_eq!(server.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_starting_a_server_already_running() {
        let (server, cancel, task) = start_server().await;
        let addr = server.local_addr().unwrap();

        for _ in 0..REPS {
            let err = server.start(LOCALHOST, addr.port(), cancel.clone()).await;
            assert!(matches!(err, Err(ServerError::AlreadyStarted)));
            assert_eq!(server.status(), ServerStatus::Started);
            assert_eq!(server.local_addr(), Some(addr));
        }

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(server.status(), ServerStatus::Ended);

        let err = server.start(LOCALHOST, 0, CancellationToken::new()).await;
        assert!(matches!(err, Err(ServerError::AlreadyStarted)));
        assert_eq!(server.status(), ServerStatus::Ended);
    }

    #[tokio::test]
    async fn test_stop_before_start_fails() {
        let server = Server::new(ServerConfig::default());
        assert!(matches!(server.stop(), Err(ServerError::NotStarted)));
        assert_eq!(server.status(), ServerStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_stop_without_listener_fails() {
        let server = Server::new(ServerConfig::default());
        server.advance(ServerStatus::Starting);
        assert!(matches!(server.stop(), Err(ServerError::InvalidState)));
        assert_eq!(server.status(), ServerStatus::Starting);
    }

    #[tokio::test]
    async fn test_cancel_before_start_ends_immediately() {
        let server = Arc::new(Server::new(ServerConfig::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        server.start(LOCALHOST, 0, cancel).await.unwrap();
        assert_eq!(server.status(), ServerStatus::Ended);
    }

    #[tokio::test]
    async fn test_bind_failure_ends_server() {
        let occupied = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();
        let server = Arc::new(Server::new(ServerConfig::default()));

        let err = server.start(LOCALHOST, port, CancellationToken::new()).await;
        assert!(matches!(err, Err(ServerError::Io(_))));
        assert_eq!(server.status(), ServerStatus::Ended);
    }

    #[tokio::test]
    async fn test_session_ids_are_sequential() {
        let (server, cancel, task) = start_server().await;
        let addr = server.local_addr().unwrap();

        let mut clients = Vec::new();
        for _ in 0..3 {
            let mut client = TestClient::connect(addr).await;
            client.write_line("enter lobby").await;
            clients.push(client);
        }
        wait_until(|| server.registry().member_count(&"lobby".into()) == 3).await;
        for id in 0..3 {
            assert_eq!(server.registry().current_room(SessionId(id)), Some("lobby".into()));
        }

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_accept_error_backoff() {
        let listener_closed = CancellationToken::new();

        let started = tokio::time::Instant::now();
        pause_after_accept_error(Duration::from_millis(50), &listener_closed).await;
        assert!(started.elapsed() >= Duration::from_millis(50));

        // A closed listener cuts the pause short.
        listener_closed.cancel();
        let started = tokio::time::Instant::now();
        pause_after_accept_error(Duration::from_secs(60), &listener_closed).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
