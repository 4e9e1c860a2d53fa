//! Control facade: the unary operations exposed to clients.
//!
//! `ChatService` validates incoming names, forwards to the registry actor,
//! and announces departures through the broadcaster. The control
//! connection handler maps each request to one call here.

use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use parley_core::{ChatMessage, ClientName, DomainError, GroupName};
use parley_protocol::ErrorCode;

use crate::auth::{AuthError, TokenStore};
use crate::broadcast::Broadcaster;
use crate::registry::{RegistryError, RegistryHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    InvalidName(#[from] DomainError),
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Registry(e) => e.code(),
            Self::Auth(e) => e.code(),
            Self::InvalidName(_) => ErrorCode::InvalidArgument,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Upper bound on a departure broadcast issued from a control request.
const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared broker state behind every connection.
#[derive(Clone)]
pub struct ChatService {
    registry: RegistryHandle,
    broadcaster: Broadcaster,
    tokens: TokenStore,
    broadcast_timeout: Duration,
}

impl ChatService {
    pub fn new(broadcaster: Broadcaster, tokens: TokenStore) -> Self {
        Self {
            registry: broadcaster.registry().clone(),
            broadcaster,
            tokens,
            broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
        }
    }

    /// Caps how long `leave_chat_room` waits on slow member channels.
    pub fn with_broadcast_timeout(mut self, broadcast_timeout: Duration) -> Self {
        self.broadcast_timeout = broadcast_timeout;
        self
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub async fn register(&self, name: ClientName) -> ServiceResult<()> {
        name.validate()?;
        self.registry.register(name).await?;
        Ok(())
    }

    pub async fn unregister(&self, name: ClientName) -> ServiceResult<()> {
        self.registry.unregister(name).await?;
        Ok(())
    }

    /// Creates `group` with `client` as its first member.
    pub async fn create_group(&self, client: ClientName, group: GroupName) -> ServiceResult<()> {
        group.validate()?;
        self.registry.create_group_for(client, group).await?;
        Ok(())
    }

    pub async fn join_group(&self, client: ClientName, group: GroupName) -> ServiceResult<()> {
        self.registry.join_group(client, group).await?;
        Ok(())
    }

    /// Announces `client`'s departure to `group`, then removes the membership.
    ///
    /// The departure notice reaches every member including `client`, so an
    /// open chat stream of `client` sees its own notice and closes. A
    /// registered client outside the group has nothing to leave and gets
    /// `Ok` without a notice. Members whose channels stay full past the
    /// broadcast timeout miss the notice.
    pub async fn leave_chat_room(&self, client: ClientName, group: GroupName) -> ServiceResult<()> {
        if self.registry.list_members(group.clone()).await.is_err() {
            return Err(RegistryError::GroupNotFound(group).into());
        }
        if !self.registry.is_registered(client.clone()).await {
            return Err(RegistryError::ClientNotRegistered(client).into());
        }
        if !self.registry.is_member(client.clone(), group.clone()).await {
            debug!(client = %client, group = %group, "Leave by non-member ignored");
            return Ok(());
        }

        let notice = ChatMessage::departure(&client, &group);
        let delivery = timeout(self.broadcast_timeout, self.broadcaster.broadcast(&group, notice));
        let notified = match delivery.await {
            Ok(report) => report.delivered,
            Err(_) => {
                warn!(client = %client, group = %group, "Departure broadcast timed out");
                0
            }
        };
        match self.registry.leave_group(client.clone(), group.clone()).await {
            Ok(()) | Err(RegistryError::NotMember { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        info!(client = %client, group = %group, notified, "Client left chat room");
        Ok(())
    }

    pub async fn client_list(&self) -> Vec<ClientName> {
        self.registry.list_clients().await
    }

    /// All groups, invitations mixed in.
    pub async fn group_list(&self) -> Vec<GroupName> {
        self.registry.list_groups().await
    }

    pub async fn group_members(&self, group: GroupName) -> ServiceResult<Vec<ClientName>> {
        Ok(self.registry.list_members(group).await?)
    }

    pub async fn login(&self, name: &str, password: &str) -> ServiceResult<String> {
        Ok(self.tokens.login(name, password).await?)
    }

    pub async fn logout(&self, token: &str) -> ServiceResult<()> {
        Ok(self.tokens.logout(token).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::DeliveryPolicy;
    use crate::registry::spawn_registry;

    fn service() -> ChatService {
        let broadcaster = Broadcaster::new(spawn_registry(), DeliveryPolicy::Block);
        ChatService::new(broadcaster, TokenStore::new("nada"))
    }

    fn alice() -> ClientName {
        ClientName::new("alice")
    }

    fn bob() -> ClientName {
        ClientName::new("bob")
    }

    fn team() -> GroupName {
        GroupName::new("team")
    }

    #[tokio::test]
    async fn test_create_then_join_lists_both_members() {
        let service = service();
        service.register(alice()).await.unwrap();
        service.register(bob()).await.unwrap();

        service.create_group(alice(), team()).await.unwrap();
        service.join_group(bob(), team()).await.unwrap();

        assert_eq!(service.group_members(team()).await.unwrap(), vec![alice(), bob()]);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_name() {
        let service = service();

        let err = service.register(ClientName::new("a+b")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(service.client_list().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_register_maps_to_already_exists() {
        let service = service();
        service.register(alice()).await.unwrap();

        let err = service.register(alice()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
    }

    #[tokio::test]
    async fn test_leave_chat_room_announces_and_removes() {
        let service = service();
        service.register(alice()).await.unwrap();
        service.register(bob()).await.unwrap();
        service.create_group(alice(), team()).await.unwrap();
        service.join_group(bob(), team()).await.unwrap();
        let mut alice_inbox = service.registry().attach_inbox(alice()).await.unwrap();
        let mut bob_inbox = service.registry().attach_inbox(bob()).await.unwrap();

        service.leave_chat_room(alice(), team()).await.unwrap();

        let notice = ChatMessage::departure(&alice(), &team());
        assert_eq!(bob_inbox.try_recv(), Some(notice.clone()));
        assert_eq!(alice_inbox.try_recv(), Some(notice));
        assert_eq!(service.group_members(team()).await.unwrap(), vec![bob()]);
    }

    #[tokio::test]
    async fn test_leave_chat_room_error_order() {
        let service = service();

        let err = service
            .leave_chat_room(ClientName::new("ghost"), GroupName::new("nowhere"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GroupNotFound);

        service.register(alice()).await.unwrap();
        service.register(bob()).await.unwrap();
        service.create_group(alice(), team()).await.unwrap();

        let err = service
            .leave_chat_room(ClientName::new("ghost"), team())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotRegistered);

        let mut bob_inbox = service.registry().attach_inbox(bob()).await.unwrap();
        let mut alice_inbox = service.registry().attach_inbox(alice()).await.unwrap();
        service.leave_chat_room(bob(), team()).await.unwrap();

        assert!(bob_inbox.try_recv().is_none());
        assert!(alice_inbox.try_recv().is_none());
        assert_eq!(service.group_members(team()).await.unwrap(), vec![alice()]);
    }

    #[tokio::test]
    async fn test_leave_not_stalled_by_full_member_channel() {
        let registry = crate::registry::spawn_registry_with_capacity(1);
        let broadcaster = Broadcaster::new(registry, DeliveryPolicy::Block);
        let service = ChatService::new(broadcaster, TokenStore::new("nada"))
            .with_broadcast_timeout(Duration::from_millis(200));
        service.register(alice()).await.unwrap();
        service.register(bob()).await.unwrap();
        service.create_group(alice(), team()).await.unwrap();
        service.join_group(bob(), team()).await.unwrap();

        // bob never opens a stream, so one message fills his channel
        service
            .broadcaster()
            .broadcast(&team(), ChatMessage::new("alice", "team", "unread"))
            .await;

        let left = timeout(Duration::from_secs(5), service.leave_chat_room(alice(), team()))
            .await
            .expect("leave completes despite a full member channel");
        left.unwrap();
        assert_eq!(service.group_members(team()).await.unwrap(), vec![bob()]);
    }

    #[tokio::test]
    async fn test_last_leave_deletes_group() {
        let service = service();
        service.register(alice()).await.unwrap();
        service.create_group(alice(), team()).await.unwrap();

        service.leave_chat_room(alice(), team()).await.unwrap();

        assert!(service.group_list().await.is_empty());
    }

    #[tokio::test]
    async fn test_invitation_listed_with_groups() {
        let service = service();
        service.register(alice()).await.unwrap();
        service.create_group(alice(), team()).await.unwrap();
        service
            .create_group(alice(), GroupName::new("alice+bob"))
            .await
            .unwrap();

        let listing = parley_core::GroupListing::partition(service.group_list().await);
        assert_eq!(listing.rooms, vec![team()]);
        assert_eq!(listing.invitations.len(), 1);
    }

    #[tokio::test]
    async fn test_login_logout() {
        let service = service();

        let token = service.login("alice", "nada").await.unwrap();
        service.logout(&token).await.unwrap();

        let err = service.login("alice", "wrong").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);
    }
}
