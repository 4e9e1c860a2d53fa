//! Robustness tests for the broker's wire handling.
//!
//! These tests talk raw newline-delimited JSON to verify the broker copes with:
//! - Malformed lines
//! - Protocol version mismatch
//! - Oversized lines
//! - Rapid connect/disconnect
//! - Garbage on a chat stream
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::time::Duration;

use parley_core::ChatMessage;
use parley_protocol::{ClientMessage, ErrorCode, MessageType, ProtocolVersion, ServerMessage};
use parleyd::config::ServerConfig;
use parleyd::server::ChatServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    addr: String,
    cancel_token: CancellationToken,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    async fn spawn_with(config: ServerConfig) -> Self {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..config
        };
        let service = parleyd::build_service(&config);
        let cancel_token = CancellationToken::new();
        let server = ChatServer::bind(config, service, cancel_token.clone())
            .await
            .expect("bind ephemeral port");
        let addr = server.local_addr().to_string();

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        TestServer { addr, cancel_token }
    }

    async fn connect(&self) -> RawClient {
        let stream = TcpStream::connect(&self.addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        RawClient {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Connects and completes the handshake.
    async fn connect_ready(&self) -> RawClient {
        let mut client = self.connect().await;
        client.send(&ClientMessage::connect()).await;
        let response = client.recv_server().await;
        assert!(matches!(response, ServerMessage::Connected { .. }));
        client
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

struct RawClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RawClient {
    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    async fn send<T: serde::Serialize>(&mut self, value: &T) {
        let mut line = serde_json::to_string(value).expect("serialize");
        line.push('\n');
        self.send_raw(&line).await;
    }

    /// Next line, or `None` on EOF.
    async fn recv_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("line within timeout")
            .unwrap_or(0);
        (n > 0).then_some(line)
    }

    async fn recv_server(&mut self) -> ServerMessage {
        let line = self.recv_line().await.expect("response line");
        serde_json::from_str(&line).expect("server message")
    }

    async fn expect_error(&mut self, code: ErrorCode) {
        match self.recv_server().await {
            ServerMessage::Error { code: actual, .. } => assert_eq!(actual, code),
            other => panic!("expected {code} error, got {other:?}"),
        }
    }

    async fn request_ok(&mut self, message: ClientMessage) {
        self.send(&message).await;
        assert_eq!(self.recv_server().await, ServerMessage::Ok);
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_version_mismatch_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let mut hello = ClientMessage::connect();
    hello.protocol_version = ProtocolVersion::new(99, 0);
    client.send(&hello).await;

    match client.recv_server().await {
        ServerMessage::Rejected {
            protocol_version, ..
        } => assert_eq!(protocol_version, ProtocolVersion::CURRENT),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(client.recv_line().await.is_none(), "connection should close");

    server.shutdown().await;
}

#[tokio::test]
async fn test_request_before_handshake_refused() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(&ClientMessage::list_clients()).await;
    client.expect_error(ErrorCode::Protocol).await;
    assert!(client.recv_line().await.is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_version_defaults_to_current() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_raw("{\"type\":\"connect\"}\n").await;
    assert!(matches!(
        client.recv_server().await,
        ServerMessage::Connected { .. }
    ));

    server.shutdown().await;
}

// ============================================================================
// Control Connection
// ============================================================================

#[tokio::test]
async fn test_malformed_lines_do_not_close_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    for garbage in ["not json\n", "{\"type\":\"no_such_request\"}\n", "[1,2,3]\n"] {
        client.send_raw(garbage).await;
        client.expect_error(ErrorCode::Protocol).await;
    }

    client.send(&ClientMessage::ping(5)).await;
    assert_eq!(client.recv_server().await, ServerMessage::Pong { seq: 5 });

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_line_closes_connection() {
    let config = ServerConfig {
        max_message_size: 1024,
        ..ServerConfig::default()
    };
    let server = TestServer::spawn_with(config).await;
    let mut client = server.connect_ready().await;

    let huge = format!(
        "{{\"type\":\"register\",\"name\":\"{}\"}}\n",
        "x".repeat(4096)
    );
    client.send_raw(&huge).await;
    client.expect_error(ErrorCode::Protocol).await;
    assert!(client.recv_line().await.is_none());

    // The broker keeps serving others
    let mut other = server.connect_ready().await;
    other.send(&ClientMessage::ping(1)).await;
    assert_eq!(other.recv_server().await, ServerMessage::Pong { seq: 1 });

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_repeated_is_protocol_error() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(&ClientMessage::connect()).await;
    client.expect_error(ErrorCode::Protocol).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for _ in 0..50 {
        let stream = TcpStream::connect(&server.addr).await.expect("connect");
        drop(stream);
    }

    let mut client = server.connect_ready().await;
    client.send(&ClientMessage::ping(42)).await;
    assert_eq!(client.recv_server().await, ServerMessage::Pong { seq: 42 });

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_request_closes_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(&ClientMessage::new(MessageType::Disconnect)).await;
    assert!(client.recv_line().await.is_none());

    server.shutdown().await;
}

// ============================================================================
// Chat Stream
// ============================================================================

#[tokio::test]
async fn test_malformed_first_stream_line_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(&ClientMessage::route_chat()).await;
    assert_eq!(client.recv_server().await, ServerMessage::StreamOpened);

    client.send_raw("definitely not a chat message\n").await;
    client.expect_error(ErrorCode::Protocol).await;
    assert!(client.recv_line().await.is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_garbage_mid_stream_is_skipped() {
    let server = TestServer::spawn().await;

    let mut control = server.connect_ready().await;
    control.request_ok(ClientMessage::register("alice")).await;
    control.request_ok(ClientMessage::register("bob")).await;
    control.request_ok(ClientMessage::create_group("alice", "team")).await;
    control.request_ok(ClientMessage::join_group("bob", "team")).await;

    let mut alice = server.connect_ready().await;
    alice.send(&ClientMessage::route_chat()).await;
    assert_eq!(alice.recv_server().await, ServerMessage::StreamOpened);
    alice.send(&ChatMessage::new("alice", "team", "")).await;

    let mut bob = server.connect_ready().await;
    bob.send(&ClientMessage::route_chat()).await;
    assert_eq!(bob.recv_server().await, ServerMessage::StreamOpened);
    bob.send(&ChatMessage::new("bob", "team", "")).await;

    alice.send_raw("{{{ broken\n").await;
    alice.send(&ChatMessage::new("alice", "team", "still here")).await;

    let line = bob.recv_line().await.expect("chat line");
    let message: ChatMessage = serde_json::from_str(&line).expect("chat message");
    assert_eq!(message.body, "still here");

    server.shutdown().await;
}

#[tokio::test]
async fn test_forged_sender_is_rewritten() {
    let server = TestServer::spawn().await;

    let mut control = server.connect_ready().await;
    control.request_ok(ClientMessage::register("alice")).await;
    control.request_ok(ClientMessage::register("bob")).await;
    control.request_ok(ClientMessage::create_group("alice", "team")).await;
    control.request_ok(ClientMessage::join_group("bob", "team")).await;

    let mut alice = server.connect_ready().await;
    alice.send(&ClientMessage::route_chat()).await;
    assert_eq!(alice.recv_server().await, ServerMessage::StreamOpened);
    alice.send(&ChatMessage::new("alice", "team", "")).await;
    alice.send(&ChatMessage::new("mallory", "team", "trust me")).await;

    let mut bob = server.connect_ready().await;
    bob.send(&ClientMessage::route_chat()).await;
    assert_eq!(bob.recv_server().await, ServerMessage::StreamOpened);
    bob.send(&ChatMessage::new("bob", "team", "")).await;

    let line = bob.recv_line().await.expect("chat line");
    let message: ChatMessage = serde_json::from_str(&line).expect("chat message");
    assert_eq!(message.sender.as_str(), "alice");
    assert_eq!(message.body, "trust me");

    server.shutdown().await;
}
