//! Line-based TCP Chat Server - Entry Point
//!
//! Starts the server and stops it on Ctrl-C.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use line_chat_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_chat_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("line_chat_server=info")),
        )
        .init();

    info!("Starting program");

    // Get bind address from command line or use default
    let mut config = ServerConfig::default();
    if let Some(bind) = env::args().nth(1) {
        let bind: SocketAddr = bind.parse()?;
        config = config.with_bind(bind);
    }

    info!("Binding {}", config.bind_addr());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Stopping the server");
                    cancel.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    });

    let server = Arc::new(Server::new(config.clone()));
    server.start(config.address, config.port, cancel).await?;

    // Give sessions a chance to flush the shutdown notice
    if !server.drain(config.shutdown_grace).await {
        warn!("Exiting with sessions still open");
    }

    info!("Server ended");
    Ok(())
}
