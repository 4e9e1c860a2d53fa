//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming control requests
//! - Routes them to the `ChatService`
//! - Hands the socket to a `ChatSession` when the client asks for a chat stream
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_protocol::{
    decode_line, encode_line, ClientMessage, ErrorCode, FrameError, MessageType, ProtocolVersion,
    ServerMessage,
};

use super::session::{ChatSession, SessionSettings};
use crate::config::ServerConfig;
use crate::service::{ChatService, ServiceError};

/// What the control loop asks the handler to do next.
enum Next {
    Continue,
    Close,
    OpenStream,
}

/// Connection handler for a single client.
///
/// Starts in control mode; a `route_chat` request switches the rest of the
/// connection to a chat stream.
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for outgoing messages
    writer: BufWriter<OwnedWriteHalf>,

    service: ChatService,

    config: Arc<ServerConfig>,

    cancel_token: CancellationToken,

    connection_id: u64,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        service: ChatService,
        config: Arc<ServerConfig>,
        cancel_token: CancellationToken,
        connection_id: u64,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            service,
            config,
            cancel_token,
            connection_id,
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake, then serves control requests until the
    /// connection closes or turns into a chat stream.
    pub async fn run(mut self) {
        debug!(connection = self.connection_id, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_id,
                error = %e,
                "Handshake failed"
            );
            return;
        }
        debug!(connection = self.connection_id, "Client handshake completed");

        match self.process_messages().await {
            Ok(true) => self.into_chat_stream().await,
            Ok(false) => {
                debug!(connection = self.connection_id, "Client disconnected");
            }
            Err(e) => {
                debug!(
                    connection = self.connection_id,
                    error = %e,
                    "Connection closed"
                );
            }
        }
    }

    /// Expects a `Connect` message and answers `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(self.config.read_timeout(), self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(&ServerMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect => {
                self.send_message(&ServerMessage::connected(self.connection_id))
                    .await
            }
            other => {
                self.send_message(&ServerMessage::error(
                    ErrorCode::Protocol,
                    "Expected connect message for handshake",
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Control loop.
    ///
    /// Returns `Ok(true)` when the connection should become a chat stream.
    async fn process_messages(&mut self) -> Result<bool, ConnectionError> {
        let cancel_token = self.cancel_token.clone();
        loop {
            let read = tokio::select! {
                _ = cancel_token.cancelled() => return Ok(false),
                read = timeout(self.config.read_timeout(), self.read_message()) => read,
            };

            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(connection = self.connection_id, "Client sent EOF");
                    return Ok(false);
                }
                Ok(Err(ConnectionError::ParseError(e))) => {
                    warn!(connection = self.connection_id, error = %e, "Malformed request");
                    self.send_message(&ServerMessage::error(ErrorCode::Protocol, e))
                        .await?;
                    continue;
                }
                Ok(Err(e)) => {
                    let _ = self
                        .send_message(&ServerMessage::error(ErrorCode::Protocol, e.to_string()))
                        .await;
                    return Err(e);
                }
                Err(_) => {
                    debug!(connection = self.connection_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            match self.handle_message(msg).await? {
                Next::Continue => {}
                Next::Close => return Ok(false),
                Next::OpenStream => return Ok(true),
            }
        }
    }

    /// Handles a single control request.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<Next, ConnectionError> {
        let service = self.service.clone();

        let response = match msg.message {
            MessageType::Connect => ServerMessage::error(ErrorCode::Protocol, "Already connected"),

            MessageType::Register { name } => {
                info!(connection = self.connection_id, client = %name, "Register requested");
                respond(service.register(name).await)
            }

            MessageType::Unregister { name } => respond(service.unregister(name).await),

            MessageType::CreateGroup { client, name } => {
                respond(service.create_group(client, name).await)
            }

            MessageType::JoinGroup { client, name } => {
                respond(service.join_group(client, name).await)
            }

            MessageType::LeaveChatRoom { client, name } => {
                respond(service.leave_chat_room(client, name).await)
            }

            MessageType::ListClients => ServerMessage::ClientList {
                clients: service.client_list().await,
            },

            MessageType::ListGroups => ServerMessage::GroupList {
                groups: service.group_list().await,
            },

            MessageType::ListMembers { name } => match service.group_members(name.clone()).await {
                Ok(members) => ServerMessage::MemberList {
                    group: name,
                    members,
                },
                Err(e) => error_response(&e),
            },

            MessageType::Login { name, password } => match service.login(&name, &password).await {
                Ok(token) => ServerMessage::LoggedIn { token },
                Err(e) => error_response(&e),
            },

            MessageType::Logout { token } => respond(service.logout(&token).await),

            MessageType::Ping { seq } => ServerMessage::Pong { seq },

            MessageType::RouteChat => {
                self.send_message(&ServerMessage::StreamOpened).await?;
                return Ok(Next::OpenStream);
            }

            MessageType::Disconnect => {
                debug!(connection = self.connection_id, "Client requested disconnect");
                return Ok(Next::Close);
            }
        };

        self.send_message(&response).await?;
        Ok(Next::Continue)
    }

    /// Hands the socket to a chat session.
    async fn into_chat_stream(self) {
        let settings = SessionSettings::from(self.config.as_ref());
        let session = ChatSession::new(
            self.reader,
            self.writer,
            self.service.broadcaster().clone(),
            settings,
            self.cancel_token,
            self.connection_id,
        );
        let reason = session.run().await;
        debug!(connection = self.connection_id, reason = %reason, "Chat stream finished");
    }

    /// Reads a single message from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > self.config.max_message_size {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: self.config.max_message_size,
            });
        }

        let msg: ClientMessage = decode_line(&line).map_err(ConnectionError::from)?;

        debug!(
            connection = self.connection_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    async fn send_message(&mut self, msg: &ServerMessage) -> Result<(), ConnectionError> {
        write_line(&mut self.writer, msg, self.config.write_timeout()).await
    }
}

fn respond(result: Result<(), ServiceError>) -> ServerMessage {
    match result {
        Ok(()) => ServerMessage::Ok,
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &ServiceError) -> ServerMessage {
    debug!(code = %error.code(), error = %error, "Request failed");
    ServerMessage::error(error.code(), error.to_string())
}

/// Writes one JSON line and flushes, bounded by `limit`.
pub(crate) async fn write_line<W, T>(
    writer: &mut W,
    value: &T,
    limit: Duration,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = encode_line(value)?;

    match timeout(limit, async {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::TooLarge { size, max } => Self::MessageTooLarge { size, max },
            FrameError::Parse(e) => Self::ParseError(e),
        }
    }
}
