//! TCP server for the parley broker.
//!
//! The server:
//! - Listens on a TCP address for client connections
//! - Spawns a ConnectionHandler for each client
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   ChatService   │────▶│  RegistryHandle │
//! │   (per client)  │     └─────────────────┘     └─────────────────┘
//! └───────┬─────────┘                                      ▲
//!         │ route_chat                                     │
//!         ▼                                                │
//! ┌─────────────────┐     ┌─────────────────┐              │
//! │   ChatSession   │────▶│   Broadcaster   │──────────────┘
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;
mod session;

pub use connection::{ConnectionError, ConnectionHandler};
pub use session::{ChatSession, CloseReason, SessionSettings, SessionState};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::service::ChatService;

/// TCP server for the broker.
pub struct ChatServer {
    listener: TcpListener,

    local_addr: SocketAddr,

    service: ChatService,

    config: Arc<ServerConfig>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,
}

impl ChatServer {
    /// Binds the listener on `config.listen_addr`.
    ///
    /// Binding to port 0 picks a free port; see [`ChatServer::local_addr`].
    pub async fn bind(
        config: ServerConfig,
        service: ChatService,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: config.listen_addr.clone(),
                error: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: config.listen_addr.clone(),
            error: e.to_string(),
        })?;

        Ok(Self {
            listener,
            local_addr,
            service,
            config: Arc::new(config),
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn service(&self) -> &ChatService {
        &self.service
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered.
    /// Open connections observe the same token and close on their own.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Broker listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            info!(connection = conn_num, peer = %peer, "Accepted connection");
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    /// Handles a new client connection by spawning a handler task.
    fn handle_connection(&self, stream: TcpStream, connection_id: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            error!(connection = connection_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let handler = ConnectionHandler::new(
            stream,
            self.service.clone(),
            Arc::clone(&self.config),
            self.cancel_token.child_token(),
            connection_id,
        );
        tokio::spawn(handler.run());
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
