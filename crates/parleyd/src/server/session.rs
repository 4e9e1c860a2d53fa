//! Chat stream router for one connection.
//!
//! After `route_chat`, a connection carries bare chat messages in both
//! directions. The first inbound message pins the stream to
//! `(sender, group)` and is not broadcast. From then on three loops run
//! concurrently:
//!
//! ```text
//!  socket ──read──▶ inbound task ──outbox──▶ drainer ──broadcast──▶ group
//!  socket ◀─write── session loop ◀──inbox─── (own delivery channel)
//! ```
//!
//! The stream ends on EOF, a read or write error, the client's own
//! departure notice, unregistration of the client, or server shutdown.
//! Teardown removes the client from the pinned group where appropriate
//! and returns the delivery channel to the registry.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Task join failures are treated as transport errors

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::{ChatMessage, ClientName, GroupName};
use parley_protocol::{decode_line, ErrorCode, ServerMessage};

use super::connection::write_line;
use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::registry::{Inbox, RegistryError, RegistryHandle};

// ============================================================================
// Settings and State
// ============================================================================

/// Per-stream limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub outbox_capacity: usize,
    pub max_message_size: usize,
    /// Idle limit on inbound reads; `None` waits indefinitely
    pub read_timeout: Option<Duration>,
    pub write_timeout: Duration,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            outbox_capacity: config.outbox_capacity.max(1),
            max_message_size: config.max_message_size,
            read_timeout: config.stream_read_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Lifecycle of a chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFirstMessage,
    Routing { client: ClientName, group: GroupName },
    Closed,
}

/// Why a chat stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent its own departure notice on the stream
    Departed,
    /// The client's departure was announced through the control facade
    Left,
    /// Clean EOF from the peer
    PeerClosed,
    /// The client was unregistered and its delivery channel closed
    Unregistered,
    /// The first message was refused
    Rejected(ErrorCode),
    /// No inbound traffic within the read timeout
    TimedOut,
    Shutdown,
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Departed => f.write_str("departed"),
            Self::Left => f.write_str("left"),
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Unregistered => f.write_str("unregistered"),
            Self::Rejected(code) => write!(f, "rejected ({code})"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// How the inbound loop finished.
#[derive(Debug)]
enum InboundEnd {
    Departed,
    PeerClosed,
    TimedOut,
    Transport(String),
}

impl From<InboundEnd> for CloseReason {
    fn from(end: InboundEnd) -> Self {
        match end {
            InboundEnd::Departed => Self::Departed,
            InboundEnd::PeerClosed => Self::PeerClosed,
            InboundEnd::TimedOut => Self::TimedOut,
            InboundEnd::Transport(e) => Self::Transport(e),
        }
    }
}

// ============================================================================
// Chat Session
// ============================================================================

/// Routes one chat stream between a socket and the broker.
pub struct ChatSession<R, W> {
    /// Taken by the inbound task once routing starts
    reader: Option<R>,
    writer: W,
    broadcaster: Broadcaster,
    settings: SessionSettings,
    cancel_token: CancellationToken,
    state: SessionState,
    connection_id: u64,
}

impl<R, W> ChatSession<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        reader: R,
        writer: W,
        broadcaster: Broadcaster,
        settings: SessionSettings,
        cancel_token: CancellationToken,
        connection_id: u64,
    ) -> Self {
        Self {
            reader: Some(reader),
            writer,
            broadcaster,
            settings,
            cancel_token,
            state: SessionState::AwaitingFirstMessage,
            connection_id,
        }
    }

    /// Current lifecycle state, for callers that hold the session before
    /// handing it to `run`.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Runs the stream to completion.
    pub async fn run(mut self) -> CloseReason {
        let cancel_token = self.cancel_token.clone();
        let first = tokio::select! {
            _ = cancel_token.cancelled() => return CloseReason::Shutdown,
            first = self.read_first_message() => first,
        };
        let first = match first {
            Ok(Some(message)) => message,
            Ok(None) => return CloseReason::PeerClosed,
            Err(reason) => return reason,
        };

        let client = first.sender;
        let group = first.receiver;

        if let Err(e) = client.validate() {
            return self.reject(ErrorCode::InvalidArgument, e.to_string()).await;
        }

        let inbox = match self.registry().attach_inbox(client.clone()).await {
            Ok(inbox) => inbox,
            Err(e) => return self.reject(e.code(), e.to_string()).await,
        };

        info!(
            connection = self.connection_id,
            client = %client,
            group = %group,
            "Chat stream attached"
        );
        self.state = SessionState::Routing {
            client: client.clone(),
            group: group.clone(),
        };

        let reason = self.route(&client, &group, inbox).await;
        self.state = SessionState::Closed;

        info!(
            connection = self.connection_id,
            client = %client,
            group = %group,
            reason = %reason,
            "Chat stream closed"
        );
        reason
    }

    fn registry(&self) -> &RegistryHandle {
        self.broadcaster.registry()
    }

    /// Reads the priming message. `Ok(None)` on EOF before any message.
    async fn read_first_message(&mut self) -> Result<Option<ChatMessage>, CloseReason> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(CloseReason::Transport("reader unavailable".to_string()));
        };

        let mut line = String::new();
        let read = match self.settings.read_timeout {
            Some(limit) => match timeout(limit, reader.read_line(&mut line)).await {
                Ok(read) => read,
                Err(_) => return Err(CloseReason::TimedOut),
            },
            None => reader.read_line(&mut line).await,
        };

        match read {
            Ok(0) => Ok(None),
            Ok(size) if size > self.settings.max_message_size => Err(self
                .reject(
                    ErrorCode::Protocol,
                    format!("message too large: {size} bytes"),
                )
                .await),
            Ok(_) => match decode_line::<ChatMessage>(&line) {
                Ok(message) => Ok(Some(message)),
                Err(e) => Err(self.reject(ErrorCode::Protocol, e.to_string()).await),
            },
            Err(e) => Err(CloseReason::Transport(e.to_string())),
        }
    }

    /// Writes one error line and closes the stream.
    async fn reject(&mut self, code: ErrorCode, message: String) -> CloseReason {
        warn!(
            connection = self.connection_id,
            code = %code,
            error = %message,
            "Chat stream rejected"
        );
        let response = ServerMessage::error(code, message);
        if let Err(e) = write_line(&mut self.writer, &response, self.settings.write_timeout).await {
            debug!(connection = self.connection_id, error = %e, "Failed to send rejection");
        }
        self.state = SessionState::Closed;
        CloseReason::Rejected(code)
    }

    async fn route(&mut self, client: &ClientName, group: &GroupName, mut inbox: Inbox) -> CloseReason {
        let Some(reader) = self.reader.take() else {
            self.registry().release_inbox(inbox).await;
            return CloseReason::Transport("reader unavailable".to_string());
        };

        let (outbox_tx, outbox_rx) = mpsc::channel(self.settings.outbox_capacity);
        let departed = Arc::new(AtomicBool::new(false));

        let mut inbound = tokio::spawn(inbound_loop(
            reader,
            client.clone(),
            outbox_tx,
            Arc::clone(&departed),
            self.settings,
        ));
        let mut drainer = tokio::spawn(drain_outbox(
            outbox_rx,
            self.broadcaster.clone(),
            group.clone(),
        ));

        let mut inbound_finished = false;
        let mut departure_echoed = false;
        let cancel_token = self.cancel_token.clone();

        let mut reason = loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break CloseReason::Shutdown,

                end = &mut inbound => {
                    inbound_finished = true;
                    break match end {
                        Ok(end) => end.into(),
                        Err(e) => CloseReason::Transport(e.to_string()),
                    };
                }

                next = inbox.recv() => {
                    let Some(message) = next else {
                        break CloseReason::Unregistered;
                    };
                    let own_departure = is_pinned_departure(&message, client, group);
                    if let Err(e) = write_line(&mut self.writer, &message, self.settings.write_timeout).await {
                        break CloseReason::Transport(e.to_string());
                    }
                    if own_departure {
                        departure_echoed = true;
                        break CloseReason::Left;
                    }
                }
            }
        };

        // The echo of a departure sent on this stream can arrive before the
        // inbound task reports it.
        if reason == CloseReason::Left && departed.load(Ordering::Acquire) {
            reason = CloseReason::Departed;
        }

        if !inbound_finished {
            inbound.abort();
        }
        if timeout(self.settings.write_timeout, &mut drainer).await.is_err() {
            warn!(client = %client, "Outbox drain timed out");
            drainer.abort();
        }

        match &reason {
            CloseReason::Departed => {
                if !departure_echoed {
                    self.flush_until_departure(client, group, &mut inbox).await;
                }
                leave_quietly(self.registry(), client, group).await;
            }
            CloseReason::PeerClosed
            | CloseReason::TimedOut
            | CloseReason::Shutdown
            | CloseReason::Transport(_) => {
                self.announce_departure(client, group, &mut inbox).await;
            }
            CloseReason::Left | CloseReason::Unregistered | CloseReason::Rejected(_) => {}
        }

        self.registry().release_inbox(inbox).await;
        reason
    }

    /// Writes queued messages up to and including the client's own
    /// departure notice.
    async fn flush_until_departure(
        &mut self,
        client: &ClientName,
        group: &GroupName,
        inbox: &mut Inbox,
    ) {
        while let Some(message) = inbox.try_recv() {
            let own_departure = is_pinned_departure(&message, client, group);
            if write_line(&mut self.writer, &message, self.settings.write_timeout)
                .await
                .is_err()
                || own_departure
            {
                break;
            }
        }
    }

    /// Tells the rest of the group the client dropped off, then removes it.
    async fn announce_departure(&self, client: &ClientName, group: &GroupName, inbox: &mut Inbox) {
        if !self.registry().is_member(client.clone(), group.clone()).await {
            return;
        }

        inbox.discard_pending();
        let notice = ChatMessage::departure(client, group);
        if timeout(
            self.settings.write_timeout,
            self.broadcaster.broadcast(group, notice),
        )
        .await
        .is_err()
        {
            warn!(client = %client, group = %group, "Departure broadcast timed out");
        }
        leave_quietly(self.registry(), client, group).await;
    }
}

// ============================================================================
// Stream Tasks
// ============================================================================

/// Reads chat lines and queues them for broadcast under the pinned sender.
async fn inbound_loop<R>(
    mut reader: R,
    client: ClientName,
    outbox: mpsc::Sender<ChatMessage>,
    departed: Arc<AtomicBool>,
    settings: SessionSettings,
) -> InboundEnd
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = match settings.read_timeout {
            Some(limit) => match timeout(limit, reader.read_line(&mut line)).await {
                Ok(read) => read,
                Err(_) => return InboundEnd::TimedOut,
            },
            None => reader.read_line(&mut line).await,
        };

        match read {
            Ok(0) => return InboundEnd::PeerClosed,
            Ok(size) if size > settings.max_message_size => {
                return InboundEnd::Transport(format!("message too large: {size} bytes"));
            }
            Ok(_) => {}
            Err(e) => return InboundEnd::Transport(e.to_string()),
        }

        if line.trim().is_empty() {
            continue;
        }

        let message = match decode_line::<ChatMessage>(&line) {
            Ok(message) => message.with_sender(&client),
            Err(e) => {
                warn!(client = %client, error = %e, "Skipping malformed chat line");
                continue;
            }
        };

        let is_departure = message.is_departure();
        if is_departure {
            departed.store(true, Ordering::Release);
        }

        debug!(client = %client, bytes = message.body.len(), "Queued chat message");
        if outbox.send(message).await.is_err() {
            return InboundEnd::Transport("outbox closed".to_string());
        }
        if is_departure {
            return InboundEnd::Departed;
        }
    }
}

/// Broadcasts queued messages in order until the outbox closes.
async fn drain_outbox(
    mut outbox: mpsc::Receiver<ChatMessage>,
    broadcaster: Broadcaster,
    group: GroupName,
) {
    while let Some(message) = outbox.recv().await {
        broadcaster.broadcast(&group, message).await;
    }
}

/// The client's departure from the stream's own group. Departures from its
/// other groups are ordinary traffic.
fn is_pinned_departure(message: &ChatMessage, client: &ClientName, group: &GroupName) -> bool {
    message.is_departure_of(client) && &message.receiver == group
}

/// Removes `client` from `group`, ignoring memberships that are already gone.
async fn leave_quietly(registry: &RegistryHandle, client: &ClientName, group: &GroupName) {
    match registry.leave_group(client.clone(), group.clone()).await {
        Ok(()) => {}
        Err(
            RegistryError::NotMember { .. }
            | RegistryError::GroupNotFound(_)
            | RegistryError::ClientNotRegistered(_),
        ) => {
            debug!(client = %client, group = %group, "Membership already removed");
        }
        Err(e) => {
            warn!(client = %client, group = %group, error = %e, "Failed to leave group");
        }
    }
}
