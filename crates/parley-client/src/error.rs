//! Error types for the parley client library.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

use parley_protocol::{ErrorCode, FrameError};

/// Client errors.
///
/// Server-side failures of a request arrive as [`ClientError::Server`]
/// carrying the broker's error code.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to reach the broker.
    #[error("Failed to connect to broker at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// Protocol version mismatch with the broker
    #[error("Protocol version mismatch (client: {client_version}, server: {server_version})")]
    VersionMismatch {
        client_version: String,
        server_version: String,
    },

    /// The broker refused the handshake.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// The broker answered a request with an error.
    #[error("Server error ({code}): {message}")]
    Server { code: ErrorCode, message: String },

    /// A response of the wrong kind arrived.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A chat stream was used before [`crate::ChatStream::open`].
    #[error("Chat stream is not pinned to a client and group")]
    NotPinned,

    /// The broker closed the connection.
    #[error("Connection closed by broker")]
    Disconnected,

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Broker error code, if this is a server-side failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
