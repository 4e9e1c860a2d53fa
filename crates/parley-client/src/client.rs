//! Broker connection client.
//!
//! This module provides:
//! - [`ClientConfig`]: where and how to connect
//! - [`ChatClient`]: a control connection issuing one request at a time
//! - [`ChatStream`]: a connection switched into chat-stream mode
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use parley_core::{ChatMessage, ClientName, GroupListing, GroupName, Invitation};
use parley_protocol::{
    decode_line, encode_line, ClientMessage, ProtocolVersion, ServerMessage, StreamFrame,
};

use crate::error::{ClientError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Default broker address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:12021";

/// Environment variable overriding the broker address.
pub const ADDR_ENV_VAR: &str = "PARLEY_ADDR";

/// Configuration for connecting to the broker.
///
/// # Example
///
/// ```rust
/// use parley_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     addr: "127.0.0.1:4000".to_string(),
///     connect_timeout: Duration::from_secs(2),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker `host:port`.
    pub addr: String,

    /// Limit on TCP connect plus handshake.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    /// Defaults with the address taken from `PARLEY_ADDR` when set.
    pub fn from_env() -> Self {
        match std::env::var(ADDR_ENV_VAR) {
            Ok(addr) if !addr.trim().is_empty() => Self::new(addr),
            _ => Self::default(),
        }
    }
}

// ============================================================================
// Line Transport
// ============================================================================

/// Newline-delimited JSON over one TCP connection.
struct Transport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Transport {
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    async fn write<T: serde::Serialize>(&mut self, value: &T) -> Result<()> {
        write_value(&mut self.writer, value).await
    }
}

async fn write_value<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let line = encode_line(value)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Control Client
// ============================================================================

/// A control connection to the broker.
///
/// Requests are strictly sequential: each call writes one request line
/// and waits for its response.
///
/// # Example
///
/// ```rust,ignore
/// use parley_client::{ChatClient, ClientConfig};
///
/// let mut client = ChatClient::connect(&ClientConfig::default()).await?;
/// client.register("alice").await?;
/// client.create_group("alice", "team").await?;
/// let members = client.list_members("team").await?;
/// ```
pub struct ChatClient {
    transport: Transport,
    connection_id: u64,
}

impl ChatClient {
    /// Connects and performs the protocol handshake.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        match timeout(config.connect_timeout, Self::connect_inner(&config.addr)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Connect {
                addr: config.addr.clone(),
                reason: "timed out".to_string(),
            }),
        }
    }

    async fn connect_inner(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClientError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let mut transport = Transport {
            reader: BufReader::new(reader),
            writer,
        };

        transport.write(&ClientMessage::connect()).await?;
        let line = transport.read_line().await?.ok_or(ClientError::Disconnected)?;

        match decode_line::<ServerMessage>(&line)? {
            ServerMessage::Connected {
                protocol_version,
                connection_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        server_version: protocol_version.to_string(),
                    });
                }
                info!(connection_id, protocol_version = %protocol_version, "Handshake complete");
                Ok(Self {
                    transport,
                    connection_id,
                })
            }
            ServerMessage::Rejected { reason, .. } => Err(ClientError::Rejected(reason)),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Connection number assigned by the broker.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Sends one request and returns its response. Error responses become
    /// [`ClientError::Server`].
    async fn request(&mut self, message: ClientMessage) -> Result<ServerMessage> {
        debug!(
            connection_id = self.connection_id,
            message_type = ?std::mem::discriminant(&message.message),
            "Sending request"
        );
        self.transport.write(&message).await?;

        let line = self
            .transport
            .read_line()
            .await?
            .ok_or(ClientError::Disconnected)?;

        match decode_line::<ServerMessage>(&line)? {
            ServerMessage::Error { code, message } => Err(ClientError::Server { code, message }),
            response => Ok(response),
        }
    }

    async fn expect_ok(&mut self, message: ClientMessage) -> Result<()> {
        match self.request(message).await? {
            ServerMessage::Ok => Ok(()),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    pub async fn register(&mut self, name: impl Into<ClientName>) -> Result<()> {
        self.expect_ok(ClientMessage::register(name)).await
    }

    pub async fn unregister(&mut self, name: impl Into<ClientName>) -> Result<()> {
        self.expect_ok(ClientMessage::unregister(name)).await
    }

    /// Creates a group; `client` becomes its first member.
    pub async fn create_group(
        &mut self,
        client: impl Into<ClientName>,
        name: impl Into<GroupName>,
    ) -> Result<()> {
        self.expect_ok(ClientMessage::create_group(client, name)).await
    }

    pub async fn join_group(
        &mut self,
        client: impl Into<ClientName>,
        name: impl Into<GroupName>,
    ) -> Result<()> {
        self.expect_ok(ClientMessage::join_group(client, name)).await
    }

    /// Announces the departure to the group, then leaves it.
    pub async fn leave_chat_room(
        &mut self,
        client: impl Into<ClientName>,
        name: impl Into<GroupName>,
    ) -> Result<()> {
        self.expect_ok(ClientMessage::leave_chat_room(client, name)).await
    }

    /// Sends a 1:1 invitation by creating the `"<inviter>+<invitee>"` group.
    pub async fn invite(
        &mut self,
        inviter: impl Into<ClientName>,
        invitee: impl Into<ClientName>,
    ) -> Result<GroupName> {
        let invitation = Invitation::new(inviter, invitee);
        let group = invitation.group_name();
        self.create_group(invitation.inviter, group.clone()).await?;
        Ok(group)
    }

    pub async fn list_clients(&mut self) -> Result<Vec<ClientName>> {
        match self.request(ClientMessage::list_clients()).await? {
            ServerMessage::ClientList { clients } => Ok(clients),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// All group names, invitations included.
    pub async fn list_groups(&mut self) -> Result<Vec<GroupName>> {
        match self.request(ClientMessage::list_groups()).await? {
            ServerMessage::GroupList { groups } => Ok(groups),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Group list split into rooms and invitations.
    pub async fn group_listing(&mut self) -> Result<GroupListing> {
        Ok(GroupListing::partition(self.list_groups().await?))
    }

    pub async fn list_members(&mut self, name: impl Into<GroupName>) -> Result<Vec<ClientName>> {
        match self.request(ClientMessage::list_members(name)).await? {
            ServerMessage::MemberList { members, .. } => Ok(members),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Exchanges the shared password for a session token.
    pub async fn login(&mut self, name: &str, password: &str) -> Result<String> {
        match self.request(ClientMessage::login(name, password)).await? {
            ServerMessage::LoggedIn { token } => Ok(token),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    pub async fn logout(&mut self, token: &str) -> Result<()> {
        self.expect_ok(ClientMessage::logout(token)).await
    }

    pub async fn ping(&mut self, seq: u64) -> Result<u64> {
        match self.request(ClientMessage::ping(seq)).await? {
            ServerMessage::Pong { seq } => Ok(seq),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Switches this connection into chat-stream mode.
    pub async fn into_stream(mut self) -> Result<ChatStream> {
        match self.request(ClientMessage::route_chat()).await? {
            ServerMessage::StreamOpened => Ok(ChatStream {
                transport: self.transport,
                pinned: None,
            }),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Tells the broker this connection is done.
    pub async fn disconnect(mut self) -> Result<()> {
        self.transport.write(&ClientMessage::disconnect()).await
    }
}

// ============================================================================
// Chat Stream
// ============================================================================

/// A connection in chat-stream mode.
///
/// Call [`ChatStream::open`] first to pin the stream to a client and group.
pub struct ChatStream {
    transport: Transport,
    pinned: Option<(ClientName, GroupName)>,
}

impl ChatStream {
    /// Connects, switches to chat mode and pins the stream in one go.
    pub async fn connect(
        config: &ClientConfig,
        client: impl Into<ClientName>,
        group: impl Into<GroupName>,
    ) -> Result<Self> {
        let control = ChatClient::connect(config).await?;
        let mut stream = control.into_stream().await?;
        stream.open(client, group).await?;
        Ok(stream)
    }

    /// Sends the empty priming message that pins the stream.
    pub async fn open(
        &mut self,
        client: impl Into<ClientName>,
        group: impl Into<GroupName>,
    ) -> Result<()> {
        let client = client.into();
        let group = group.into();
        self.transport
            .write(&ChatMessage::new(client.clone(), group.clone(), ""))
            .await?;
        debug!(client = %client, group = %group, "Chat stream pinned");
        self.pinned = Some((client, group));
        Ok(())
    }

    pub fn client(&self) -> Option<&ClientName> {
        self.pinned.as_ref().map(|(client, _)| client)
    }

    pub fn group(&self) -> Option<&GroupName> {
        self.pinned.as_ref().map(|(_, group)| group)
    }

    /// Sends `body` to the pinned group.
    pub async fn send(&mut self, body: impl Into<String>) -> Result<()> {
        let (client, group) = self.pinned.as_ref().ok_or(ClientError::NotPinned)?;
        let message = ChatMessage::new(client.clone(), group.clone(), body);
        self.transport.write(&message).await
    }

    /// Announces departure; the broker echoes it back and closes the stream.
    pub async fn leave(&mut self) -> Result<()> {
        let (client, group) = self.pinned.as_ref().ok_or(ClientError::NotPinned)?;
        let message = ChatMessage::departure(client, group);
        self.transport.write(&message).await
    }

    /// Next message from the group. `Ok(None)` once the broker closes the stream.
    pub async fn recv(&mut self) -> Result<Option<ChatMessage>> {
        let Some(line) = self.transport.read_line().await? else {
            return Ok(None);
        };
        frame_to_message(&line).map(Some)
    }

    /// Splits into independently owned halves.
    pub fn into_split(self) -> Result<(ChatReceiver, ChatSender)> {
        let (client, group) = self.pinned.ok_or(ClientError::NotPinned)?;
        Ok((
            ChatReceiver {
                reader: self.transport.reader,
            },
            ChatSender {
                writer: self.transport.writer,
                client,
                group,
            },
        ))
    }
}

/// Receiving half of a pinned chat stream.
pub struct ChatReceiver {
    reader: BufReader<OwnedReadHalf>,
}

impl ChatReceiver {
    pub async fn recv(&mut self) -> Result<Option<ChatMessage>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        frame_to_message(&line).map(Some)
    }
}

/// Sending half of a pinned chat stream.
pub struct ChatSender {
    writer: OwnedWriteHalf,
    client: ClientName,
    group: GroupName,
}

impl ChatSender {
    pub async fn send(&mut self, body: impl Into<String>) -> Result<()> {
        let message = ChatMessage::new(self.client.clone(), self.group.clone(), body);
        write_value(&mut self.writer, &message).await
    }

    pub async fn leave(&mut self) -> Result<()> {
        let message = ChatMessage::departure(&self.client, &self.group);
        write_value(&mut self.writer, &message).await
    }
}

fn frame_to_message(line: &str) -> Result<ChatMessage> {
    match decode_line::<StreamFrame>(line)? {
        StreamFrame::Chat(message) => Ok(message),
        StreamFrame::Server(ServerMessage::Error { code, message }) => {
            Err(ClientError::Server { code, message })
        }
        StreamFrame::Server(other) => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::ErrorCode;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.addr, "127.0.0.1:12021");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_frame_to_message() {
        let message = frame_to_message(r#"{"sender":"bob","receiver":"team","body":"hi"}"#).unwrap();
        assert_eq!(message.body, "hi");

        let err = frame_to_message(r#"{"type":"error","code":"stream_busy","message":"busy"}"#)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::StreamBusy));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = ChatClient::connect(&ClientConfig::new(addr)).await;
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }
}
