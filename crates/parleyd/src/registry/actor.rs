//! Registry actor - owns all client and group state and processes commands.
//!
//! The RegistryActor is the single owner of the client registry and the
//! group store. It receives commands via an mpsc channel and answers each
//! on a oneshot channel. Because every command runs to completion before
//! the next one starts, multi-step mutations such as the unregister
//! cascade are atomic with respect to every other operation.
//!
//! The actor never sends on a delivery channel. Broadcasts take a snapshot
//! of the targets with `DeliveryTargets` and deliver outside the actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Response send failures are ignored (the caller went away)

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_core::{ChatMessage, ClientName, GroupKind, GroupName};

use super::commands::{DeliveryTarget, Inbox, RegistryCommand, RegistryError};

// ============================================================================
// State Entries
// ============================================================================

/// Registry entry for one client.
#[derive(Debug)]
struct ClientEntry {
    /// Groups the client has joined (mirror of the group member sets)
    groups: HashSet<GroupName>,
    /// Sending end of the delivery channel, cloned into broadcast snapshots
    sender: mpsc::Sender<ChatMessage>,
    /// Receiving end, `None` while a chat stream holds it
    inbox: Option<mpsc::Receiver<ChatMessage>>,
    /// Registration generation, distinguishes re-registrations of a name
    epoch: u64,
    registered_at: DateTime<Utc>,
}

/// Group store entry.
#[derive(Debug)]
struct GroupEntry {
    kind: GroupKind,
    members: HashSet<ClientName>,
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all client and group state.
///
/// # Ownership
///
/// - `clients`: client name → groups and delivery channel
/// - `groups`: group name → kind and member set
///
/// Both maps are kept consistent: a client lists a group exactly when
/// the group lists the client, and a group with no members is removed.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    clients: HashMap<ClientName, ClientEntry>,

    groups: HashMap<GroupName, GroupEntry>,

    /// Capacity of each client's delivery channel
    channel_capacity: usize,

    /// Next registration generation
    next_epoch: u64,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `channel_capacity` - Buffer size of every client delivery channel
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, channel_capacity: usize) -> Self {
        Self {
            receiver,
            clients: HashMap::new(),
            groups: HashMap::new(),
            channel_capacity: channel_capacity.max(1),
            next_epoch: 1,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            clients = self.clients.len(),
            groups = self.groups.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register { name, respond_to } => {
                let result = self.handle_register(name);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister { name, respond_to } => {
                let result = self.handle_unregister(&name);
                let _ = respond_to.send(result);
            }
            RegistryCommand::IsRegistered { name, respond_to } => {
                let _ = respond_to.send(self.clients.contains_key(&name));
            }
            RegistryCommand::ListClients { respond_to } => {
                let _ = respond_to.send(sorted(self.clients.keys()));
            }
            RegistryCommand::GroupsOf { client, respond_to } => {
                let result = self
                    .clients
                    .get(&client)
                    .map(|entry| sorted(entry.groups.iter()))
                    .ok_or(RegistryError::ClientNotRegistered(client));
                let _ = respond_to.send(result);
            }
            RegistryCommand::CreateGroup {
                name,
                creator,
                respond_to,
            } => {
                let result = self.handle_create_group(name, creator);
                let _ = respond_to.send(result);
            }
            RegistryCommand::JoinGroup {
                client,
                group,
                respond_to,
            } => {
                let result = self.handle_join_group(client, group);
                let _ = respond_to.send(result);
            }
            RegistryCommand::LeaveGroup {
                client,
                group,
                respond_to,
            } => {
                let result = self.handle_leave_group(&client, &group);
                let _ = respond_to.send(result);
            }
            RegistryCommand::ListGroups { respond_to } => {
                let _ = respond_to.send(sorted(self.groups.keys()));
            }
            RegistryCommand::ListMembers { group, respond_to } => {
                let result = self
                    .groups
                    .get(&group)
                    .map(|entry| sorted(entry.members.iter()))
                    .ok_or(RegistryError::GroupNotFound(group));
                let _ = respond_to.send(result);
            }
            RegistryCommand::IsMember {
                client,
                group,
                respond_to,
            } => {
                let is_member = self
                    .groups
                    .get(&group)
                    .is_some_and(|entry| entry.members.contains(&client));
                let _ = respond_to.send(is_member);
            }
            RegistryCommand::DeliveryTargets { group, respond_to } => {
                let _ = respond_to.send(self.handle_delivery_targets(&group));
            }
            RegistryCommand::AttachInbox { client, respond_to } => {
                let result = self.handle_attach_inbox(client);
                let _ = respond_to.send(result);
            }
            RegistryCommand::ReleaseInbox { inbox } => {
                self.handle_release_inbox(inbox);
            }
        }
    }

    // ========================================================================
    // Client Registry
    // ========================================================================

    fn handle_register(&mut self, name: ClientName) -> Result<(), RegistryError> {
        if self.clients.contains_key(&name) {
            warn!(client = %name, "Rejecting duplicate registration");
            return Err(RegistryError::ClientAlreadyExists(name));
        }

        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        let epoch = self.next_epoch;
        self.next_epoch = self.next_epoch.wrapping_add(1);

        info!(client = %name, epoch, "Client registered");
        self.clients.insert(
            name,
            ClientEntry {
                groups: HashSet::new(),
                sender,
                inbox: Some(receiver),
                epoch,
                registered_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Removes a client and every membership it holds.
    ///
    /// Dropping the entry drops the delivery sender. A chat stream holding
    /// the inbox sees the channel close once queued messages are drained.
    fn handle_unregister(&mut self, name: &ClientName) -> Result<(), RegistryError> {
        let entry = self
            .clients
            .remove(name)
            .ok_or_else(|| RegistryError::ClientNotFound(name.clone()))?;

        for group in &entry.groups {
            self.remove_member(group, name);
        }

        let connected_secs = (Utc::now() - entry.registered_at).num_seconds();
        info!(
            client = %name,
            groups = entry.groups.len(),
            connected_secs,
            "Client unregistered"
        );
        Ok(())
    }

    // ========================================================================
    // Group Store
    // ========================================================================

    fn handle_create_group(
        &mut self,
        name: GroupName,
        creator: Option<ClientName>,
    ) -> Result<(), RegistryError> {
        if self.groups.contains_key(&name) {
            return Err(RegistryError::GroupAlreadyExists(name));
        }
        if let Some(creator) = &creator {
            if !self.clients.contains_key(creator) {
                return Err(RegistryError::ClientNotRegistered(creator.clone()));
            }
        }

        let kind = GroupKind::of(&name);
        let mut members = HashSet::new();
        if let Some(creator) = creator {
            if let Some(entry) = self.clients.get_mut(&creator) {
                entry.groups.insert(name.clone());
            }
            members.insert(creator);
        }

        info!(
            group = %name,
            invitation = kind.is_invitation(),
            members = members.len(),
            "Group created"
        );
        self.groups.insert(name, GroupEntry { kind, members });
        Ok(())
    }

    fn handle_join_group(
        &mut self,
        client: ClientName,
        group: GroupName,
    ) -> Result<(), RegistryError> {
        let Some(group_entry) = self.groups.get_mut(&group) else {
            return Err(RegistryError::GroupNotFound(group));
        };
        let Some(client_entry) = self.clients.get_mut(&client) else {
            return Err(RegistryError::ClientNotRegistered(client));
        };
        if group_entry.members.contains(&client) {
            return Err(RegistryError::AlreadyMember { client, group });
        }

        client_entry.groups.insert(group.clone());
        group_entry.members.insert(client.clone());
        info!(client = %client, group = %group, "Client joined group");
        Ok(())
    }

    fn handle_leave_group(
        &mut self,
        client: &ClientName,
        group: &GroupName,
    ) -> Result<(), RegistryError> {
        let Some(group_entry) = self.groups.get(group) else {
            return Err(RegistryError::GroupNotFound(group.clone()));
        };
        let Some(client_entry) = self.clients.get_mut(client) else {
            return Err(RegistryError::ClientNotRegistered(client.clone()));
        };
        if !group_entry.members.contains(client) {
            return Err(RegistryError::NotMember {
                client: client.clone(),
                group: group.clone(),
            });
        }

        client_entry.groups.remove(group);
        self.remove_member(group, client);
        info!(client = %client, group = %group, "Client left group");
        Ok(())
    }

    /// Removes `client` from the member set of `group`, deleting the group
    /// once it is empty. Does not touch the client entry.
    fn remove_member(&mut self, group: &GroupName, client: &ClientName) {
        let emptied = match self.groups.get_mut(group) {
            Some(entry) => {
                entry.members.remove(client);
                entry.members.is_empty()
            }
            None => false,
        };

        if emptied {
            if let Some(entry) = self.groups.remove(group) {
                debug!(group = %group, kind = ?entry.kind, "Removed empty group");
            }
        }
    }

    // ========================================================================
    // Delivery Channels
    // ========================================================================

    fn handle_delivery_targets(&self, group: &GroupName) -> Option<Vec<DeliveryTarget>> {
        let entry = self.groups.get(group)?;
        let targets = entry
            .members
            .iter()
            .filter_map(|member| {
                self.clients.get(member).map(|client| DeliveryTarget {
                    client: member.clone(),
                    sender: client.sender.clone(),
                })
            })
            .collect();
        Some(targets)
    }

    fn handle_attach_inbox(&mut self, client: ClientName) -> Result<Inbox, RegistryError> {
        let Some(entry) = self.clients.get_mut(&client) else {
            return Err(RegistryError::ClientNotRegistered(client));
        };
        let Some(receiver) = entry.inbox.take() else {
            warn!(client = %client, "Delivery channel already attached");
            return Err(RegistryError::InboxInUse(client));
        };

        debug!(client = %client, epoch = entry.epoch, "Delivery channel attached");
        Ok(Inbox::new(client, entry.epoch, receiver))
    }

    fn handle_release_inbox(&mut self, mut inbox: Inbox) {
        let client = inbox.client().clone();
        let Some(entry) = self.clients.get_mut(&client) else {
            debug!(client = %client, "Dropping inbox of unregistered client");
            return;
        };
        if entry.epoch != inbox.epoch() || entry.inbox.is_some() {
            debug!(client = %client, "Dropping inbox of earlier registration");
            return;
        }

        let discarded = inbox.discard_pending();
        if discarded > 0 {
            debug!(client = %client, discarded, "Discarded undelivered messages");
        }
        entry.inbox = Some(inbox.into_receiver());
        debug!(client = %client, "Delivery channel released");
    }

    // ========================================================================
    // Test Helpers
    // ========================================================================

    #[cfg(test)]
    fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[cfg(test)]
    fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Checks that memberships are mirrored on both sides and no group is empty.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let groups_ok = self.groups.iter().all(|(name, group)| {
            !group.members.is_empty()
                && group.members.iter().all(|member| {
                    self.clients
                        .get(member)
                        .is_some_and(|client| client.groups.contains(name))
                })
        });
        let clients_ok = self.clients.iter().all(|(name, client)| {
            client.groups.iter().all(|group| {
                self.groups
                    .get(group)
                    .is_some_and(|entry| entry.members.contains(name))
            })
        });
        groups_ok && clients_ok
    }
}

/// Collects names in sorted order so listings are stable.
fn sorted<'a, T>(names: impl Iterator<Item = &'a T>) -> Vec<T>
where
    T: Ord + Clone + 'a,
{
    let mut names: Vec<T> = names.cloned().collect();
    names.sort();
    names
}
