//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor. It is the only way the broadcaster, the control
//! facade, and chat sessions reach client and group state.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use tokio::sync::{mpsc, oneshot};

use parley_core::{ClientName, GroupName};

use super::commands::{DeliveryTarget, Inbox, RegistryCommand, RegistryError};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// handle.register(ClientName::new("alice")).await?;
/// handle.create_group_for(ClientName::new("alice"), GroupName::new("team")).await?;
///
/// let members = handle.list_members(GroupName::new("team")).await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Sends a command built around a fresh oneshot and awaits its reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    // ========================================================================
    // Client Registry
    // ========================================================================

    /// Register a new client.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ClientAlreadyExists` if the name is taken
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, name: ClientName) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Register { name, respond_to })
            .await?
    }

    /// Unregister a client, removing it from every group it joined.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ClientNotFound` if the name is not registered
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn unregister(&self, name: ClientName) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Unregister { name, respond_to })
            .await?
    }

    /// Returns `false` if the client is unknown or the actor is gone.
    pub async fn is_registered(&self, name: ClientName) -> bool {
        self.request(|respond_to| RegistryCommand::IsRegistered { name, respond_to })
            .await
            .unwrap_or(false)
    }

    /// Get all registered client names.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn list_clients(&self) -> Vec<ClientName> {
        self.request(|respond_to| RegistryCommand::ListClients { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Groups the client has joined.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ClientNotRegistered`
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn groups_of(&self, client: ClientName) -> Result<Vec<GroupName>, RegistryError> {
        self.request(|respond_to| RegistryCommand::GroupsOf { client, respond_to })
            .await?
    }

    // ========================================================================
    // Group Store
    // ========================================================================

    /// Create an empty group.
    ///
    /// The group is removed the first time its member set drains to empty.
    ///
    /// # Errors
    ///
    /// - `RegistryError::GroupAlreadyExists` if the name is taken
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn create_group(&self, name: GroupName) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::CreateGroup {
            name,
            creator: None,
            respond_to,
        })
        .await?
    }

    /// Create a group with `creator` as its first member, in one step.
    ///
    /// # Errors
    ///
    /// - `RegistryError::GroupAlreadyExists` if the name is taken
    /// - `RegistryError::ClientNotRegistered` if the creator is unknown
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn create_group_for(
        &self,
        creator: ClientName,
        name: GroupName,
    ) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::CreateGroup {
            name,
            creator: Some(creator),
            respond_to,
        })
        .await?
    }

    /// Add a client to an existing group.
    ///
    /// # Errors
    ///
    /// In order: `GroupNotFound`, `ClientNotRegistered`, `AlreadyMember`,
    /// then `ChannelClosed` if the actor has shut down.
    pub async fn join_group(&self, client: ClientName, group: GroupName) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::JoinGroup {
            client,
            group,
            respond_to,
        })
        .await?
    }

    /// Remove a client from a group. An emptied group is deleted.
    ///
    /// # Errors
    ///
    /// In order: `GroupNotFound`, `ClientNotRegistered`, `NotMember`,
    /// then `ChannelClosed` if the actor has shut down.
    pub async fn leave_group(&self, client: ClientName, group: GroupName) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::LeaveGroup {
            client,
            group,
            respond_to,
        })
        .await?
    }

    /// Get all group names, invitations included.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn list_groups(&self) -> Vec<GroupName> {
        self.request(|respond_to| RegistryCommand::ListGroups { respond_to })
            .await
            .unwrap_or_default()
    }

    /// # Errors
    ///
    /// - `RegistryError::GroupNotFound`
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn list_members(&self, group: GroupName) -> Result<Vec<ClientName>, RegistryError> {
        self.request(|respond_to| RegistryCommand::ListMembers { group, respond_to })
            .await?
    }

    pub async fn is_member(&self, client: ClientName, group: GroupName) -> bool {
        self.request(|respond_to| RegistryCommand::IsMember {
            client,
            group,
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    // ========================================================================
    // Delivery Channels
    // ========================================================================

    /// Snapshot the delivery targets of a group's members.
    ///
    /// Returns `None` if the group does not exist or the actor is gone.
    pub async fn delivery_targets(&self, group: GroupName) -> Option<Vec<DeliveryTarget>> {
        self.request(|respond_to| RegistryCommand::DeliveryTargets { group, respond_to })
            .await
            .ok()
            .flatten()
    }

    /// Take exclusive ownership of a client's delivery channel.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ClientNotRegistered`
    /// - `RegistryError::InboxInUse` if another chat stream holds it
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn attach_inbox(&self, client: ClientName) -> Result<Inbox, RegistryError> {
        self.request(|respond_to| RegistryCommand::AttachInbox { client, respond_to })
            .await?
    }

    /// Give a delivery channel back to the registry.
    ///
    /// This is a fire-and-forget operation. If the actor is gone the
    /// inbox is simply dropped.
    pub async fn release_inbox(&self, inbox: Inbox) {
        let _ = self.sender.send(RegistryCommand::ReleaseInbox { inbox }).await;
    }

    /// Check if the actor is still running.
    ///
    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
