//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listening address
pub const DEFAULT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Longest accepted inbound line, in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Per-session outbound queue capacity
pub const DEFAULT_OUTBOUND_BUFFER: usize = 32;

/// Longest a closing session waits for its writer to flush
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a failed accept before trying again
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long the binary waits for sessions to close on shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: IpAddr,
    pub port: u16,
    pub max_line_length: usize,
    pub outbound_buffer: usize,
    pub shutdown_grace: Duration,
    pub close_timeout: Duration,
    pub accept_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            port: DEFAULT_PORT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
        }
    }
}

impl ServerConfig {
    /// Override the bind address with `<address>:<port>`
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.address = bind.ip();
        self.port = bind.port();
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}
