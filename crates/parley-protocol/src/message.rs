//! Control-mode message types.

use crate::version::ProtocolVersion;
use parley_core::{ClientName, GroupName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requests a client can send on a control connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake, must be the first line of every connection
    Connect,

    /// Register a client name
    Register { name: ClientName },

    /// Remove a client and all of its memberships
    Unregister { name: ClientName },

    /// Create a group; the creating client joins it
    CreateGroup { client: ClientName, name: GroupName },

    /// Join an existing group
    JoinGroup { client: ClientName, name: GroupName },

    /// Announce departure to the group, then leave it
    LeaveChatRoom { client: ClientName, name: GroupName },

    /// List registered clients
    ListClients,

    /// List groups, invitations included
    ListGroups,

    /// List the members of one group
    ListMembers { name: GroupName },

    /// Exchange the shared password for a session token
    Login { name: String, password: String },

    /// Invalidate a session token
    Logout { token: String },

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Switch this connection into chat-stream mode
    RouteChat,

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect() -> Self {
        Self::new(MessageType::Connect)
    }

    pub fn register(name: impl Into<ClientName>) -> Self {
        Self::new(MessageType::Register { name: name.into() })
    }

    pub fn unregister(name: impl Into<ClientName>) -> Self {
        Self::new(MessageType::Unregister { name: name.into() })
    }

    pub fn create_group(client: impl Into<ClientName>, name: impl Into<GroupName>) -> Self {
        Self::new(MessageType::CreateGroup {
            client: client.into(),
            name: name.into(),
        })
    }

    pub fn join_group(client: impl Into<ClientName>, name: impl Into<GroupName>) -> Self {
        Self::new(MessageType::JoinGroup {
            client: client.into(),
            name: name.into(),
        })
    }

    pub fn leave_chat_room(client: impl Into<ClientName>, name: impl Into<GroupName>) -> Self {
        Self::new(MessageType::LeaveChatRoom {
            client: client.into(),
            name: name.into(),
        })
    }

    pub fn list_clients() -> Self {
        Self::new(MessageType::ListClients)
    }

    pub fn list_groups() -> Self {
        Self::new(MessageType::ListGroups)
    }

    pub fn list_members(name: impl Into<GroupName>) -> Self {
        Self::new(MessageType::ListMembers { name: name.into() })
    }

    pub fn login(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(MessageType::Login {
            name: name.into(),
            password: password.into(),
        })
    }

    pub fn logout(token: impl Into<String>) -> Self {
        Self::new(MessageType::Logout {
            token: token.into(),
        })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn route_chat() -> Self {
        Self::new(MessageType::RouteChat)
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Machine-readable reason attached to every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Duplicate client or group name
    AlreadyExists,
    /// Unregister of an unknown client, or logout of an unknown token
    NotFound,
    GroupNotFound,
    NotRegistered,
    AlreadyMember,
    /// Wrong shared password
    Unauthenticated,
    /// Malformed name or empty login
    InvalidArgument,
    /// The client's delivery channel is attached to another chat stream
    StreamBusy,
    /// Malformed or out-of-place request
    Protocol,
    /// The broker could not complete the request
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::GroupNotFound => "group_not_found",
            Self::NotRegistered => "not_registered",
            Self::AlreadyMember => "already_member",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidArgument => "invalid_argument",
            Self::StreamBusy => "stream_busy",
            Self::Protocol => "protocol",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Messages sent from broker to clients in control mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted
    Connected {
        /// Broker's protocol version
        protocol_version: ProtocolVersion,
        /// Sequence number of this connection, for log correlation
        connection_id: u64,
    },

    /// Handshake rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Broker's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Request succeeded with no payload
    Ok,

    ClientList { clients: Vec<ClientName> },

    /// Groups and invitations, unpartitioned
    GroupList { groups: Vec<GroupName> },

    MemberList {
        group: GroupName,
        members: Vec<ClientName>,
    },

    LoggedIn { token: String },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// The connection is now a chat stream
    StreamOpened,

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn connected(connection_id: u64) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            connection_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::join_group("bob", "team");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"join_group\""));
        assert!(json.contains("\"client\":\"bob\""));
        assert!(json.contains("\"name\":\"team\""));
        assert!(json.contains("\"protocol_version\""));
    }

    #[test]
    fn test_unit_request_parses_without_version() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"list_groups"}"#).unwrap();
        assert_eq!(parsed.message, MessageType::ListGroups);
        assert_eq!(parsed.protocol_version, ProtocolVersion::CURRENT);
    }

    #[test]
    fn test_message_roundtrip() {
        let original = ClientMessage::leave_chat_room("bob", "team");
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_error_response_serialization() {
        let msg = ServerMessage::error(ErrorCode::GroupNotFound, "group not found: team");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"code\":\"group_not_found\""));
    }

    #[test]
    fn test_error_code_display_matches_wire() {
        let json = serde_json::to_string(&ErrorCode::StreamBusy).unwrap();
        assert_eq!(json, format!("\"{}\"", ErrorCode::StreamBusy));
    }

    #[test]
    fn test_ok_is_tagged_unit() {
        assert_eq!(serde_json::to_string(&ServerMessage::Ok).unwrap(), r#"{"type":"ok"}"#);
    }
}
