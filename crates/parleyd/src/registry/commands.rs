//! Registry actor commands, errors, and delivery types.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `DeliveryTarget` / `Inbox`: the two ends of a client's delivery channel
//!
//! All types are designed for async message passing and follow the panic-free policy.

use parley_core::{ChatMessage, ClientName, GroupName};
use parley_protocol::ErrorCode;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a new client with a fresh delivery channel.
    ///
    /// # Errors
    /// - `RegistryError::ClientAlreadyExists` if the name is taken
    Register {
        name: ClientName,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a client, cascading removal from every joined group.
    ///
    /// # Errors
    /// - `RegistryError::ClientNotFound` if the name is not registered
    Unregister {
        name: ClientName,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    IsRegistered {
        name: ClientName,
        respond_to: oneshot::Sender<bool>,
    },

    ListClients {
        respond_to: oneshot::Sender<Vec<ClientName>>,
    },

    /// Groups the client has joined.
    ///
    /// # Errors
    /// - `RegistryError::ClientNotRegistered` if the name is not registered
    GroupsOf {
        client: ClientName,
        respond_to: oneshot::Sender<Result<Vec<GroupName>, RegistryError>>,
    },

    /// Create a group. With a `creator`, the creator joins in the same step.
    ///
    /// # Errors
    /// - `RegistryError::GroupAlreadyExists` if the name is taken
    /// - `RegistryError::ClientNotRegistered` if the creator is unknown
    CreateGroup {
        name: GroupName,
        creator: Option<ClientName>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Add a client to a group.
    ///
    /// # Errors
    /// Checked in order: `GroupNotFound`, `ClientNotRegistered`, `AlreadyMember`.
    JoinGroup {
        client: ClientName,
        group: GroupName,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a client from a group, deleting the group if it empties.
    ///
    /// # Errors
    /// Checked in order: `GroupNotFound`, `ClientNotRegistered`, `NotMember`.
    LeaveGroup {
        client: ClientName,
        group: GroupName,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    ListGroups {
        respond_to: oneshot::Sender<Vec<GroupName>>,
    },

    /// # Errors
    /// - `RegistryError::GroupNotFound`
    ListMembers {
        group: GroupName,
        respond_to: oneshot::Sender<Result<Vec<ClientName>, RegistryError>>,
    },

    IsMember {
        client: ClientName,
        group: GroupName,
        respond_to: oneshot::Sender<bool>,
    },

    /// Snapshot the delivery senders of every current member.
    ///
    /// Returns `None` if the group does not exist.
    DeliveryTargets {
        group: GroupName,
        respond_to: oneshot::Sender<Option<Vec<DeliveryTarget>>>,
    },

    /// Take the receiving end of a client's delivery channel.
    ///
    /// # Errors
    /// - `RegistryError::ClientNotRegistered`
    /// - `RegistryError::InboxInUse` if another stream holds it
    AttachInbox {
        client: ClientName,
        respond_to: oneshot::Sender<Result<Inbox, RegistryError>>,
    },

    /// Return an inbox taken with `AttachInbox`.
    ///
    /// Fire-and-forget. Pending messages are discarded; an inbox from a
    /// previous registration of the same name is dropped.
    ReleaseInbox { inbox: Inbox },
}

// ============================================================================
// Delivery Channel Ends
// ============================================================================

/// Sending end of one member's delivery channel, as snapshotted for a broadcast.
#[derive(Debug, Clone)]
pub struct DeliveryTarget {
    pub client: ClientName,
    pub sender: mpsc::Sender<ChatMessage>,
}

/// Receiving end of a client's delivery channel, held by its chat stream.
#[derive(Debug)]
pub struct Inbox {
    client: ClientName,
    /// Registration generation the channel belongs to
    epoch: u64,
    receiver: mpsc::Receiver<ChatMessage>,
}

impl Inbox {
    pub(crate) fn new(client: ClientName, epoch: u64, receiver: mpsc::Receiver<ChatMessage>) -> Self {
        Self {
            client,
            epoch,
            receiver,
        }
    }

    pub fn client(&self) -> &ClientName {
        &self.client
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Waits for the next delivered message.
    ///
    /// Returns `None` once the client is unregistered and every queued
    /// message has been received.
    pub async fn recv(&mut self) -> Option<ChatMessage> {
        self.receiver.recv().await
    }

    /// Takes a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<ChatMessage> {
        self.receiver.try_recv().ok()
    }

    /// Discards everything currently queued, returning how many were dropped.
    pub(crate) fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    pub(crate) fn into_receiver(self) -> mpsc::Receiver<ChatMessage> {
        self.receiver
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
///
/// Uses `thiserror` for ergonomic error handling and Display implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("client already exists: {0}")]
    ClientAlreadyExists(ClientName),

    /// Unregister of a name that was never registered.
    #[error("client not found: {0}")]
    ClientNotFound(ClientName),

    /// A group operation referenced an unregistered client.
    #[error("client is not registered: {0}")]
    ClientNotRegistered(ClientName),

    #[error("group already exists: {0}")]
    GroupAlreadyExists(GroupName),

    #[error("group not found: {0}")]
    GroupNotFound(GroupName),

    #[error("client {client} already joined group {group}")]
    AlreadyMember { client: ClientName, group: GroupName },

    /// Never reaches a client: a leave by a non-member succeeds at the facade.
    #[error("client {client} is not a member of group {group}")]
    NotMember { client: ClientName, group: GroupName },

    /// The delivery channel is attached to another live chat stream.
    #[error("client {0} already has an open chat stream")]
    InboxInUse(ClientName),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl RegistryError {
    /// Wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ClientAlreadyExists(_) | Self::GroupAlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::ClientNotFound(_) => ErrorCode::NotFound,
            Self::ClientNotRegistered(_) => ErrorCode::NotRegistered,
            Self::GroupNotFound(_) => ErrorCode::GroupNotFound,
            Self::AlreadyMember { .. } => ErrorCode::AlreadyMember,
            Self::InboxInUse(_) => ErrorCode::StreamBusy,
            Self::NotMember { .. } | Self::ChannelClosed => ErrorCode::Internal,
        }
    }
}
