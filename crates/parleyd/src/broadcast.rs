//! Group fan-out of chat messages.
//!
//! A broadcast snapshots the member delivery targets from the registry
//! actor and then sends to each of them outside the actor, so a slow
//! recipient never stalls registry operations.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use parley_core::{ChatMessage, GroupName};

use crate::registry::{DeliveryTarget, RegistryHandle};

/// What to do when a recipient's delivery channel is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPolicy {
    /// Wait for capacity
    #[default]
    Block,
    /// Skip the recipient and log a warning
    Drop,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Delivers chat messages to every member of a group.
#[derive(Clone)]
pub struct Broadcaster {
    registry: RegistryHandle,
    policy: DeliveryPolicy,
}

impl Broadcaster {
    pub fn new(registry: RegistryHandle, policy: DeliveryPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Sends `message` to every member of `group`.
    ///
    /// The sender is skipped unless the message is its own departure notice,
    /// which is echoed back so the departing stream can observe it. A group
    /// that does not exist is a silent no-op.
    pub async fn broadcast(&self, group: &GroupName, message: ChatMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let Some(targets) = self.registry.delivery_targets(group.clone()).await else {
            debug!(group = %group, sender = %message.sender, "Broadcast to missing group ignored");
            return report;
        };

        let echo_sender = message.is_departure();
        for target in targets {
            if target.client == message.sender && !echo_sender {
                continue;
            }
            if self.deliver(&target, message.clone()).await {
                report.delivered += 1;
            } else {
                report.dropped += 1;
            }
        }

        debug!(
            group = %group,
            sender = %message.sender,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast complete"
        );
        report
    }

    async fn deliver(&self, target: &DeliveryTarget, message: ChatMessage) -> bool {
        match self.policy {
            DeliveryPolicy::Block => {
                if target.sender.send(message).await.is_err() {
                    debug!(client = %target.client, "Recipient channel closed");
                    return false;
                }
                true
            }
            DeliveryPolicy::Drop => match target.sender.try_send(message) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(client = %target.client, "Recipient channel full, message dropped");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(client = %target.client, "Recipient channel closed");
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{spawn_registry, spawn_registry_with_capacity};
    use parley_core::ClientName;

    async fn setup_team(registry: &RegistryHandle, members: &[&str]) {
        for name in members {
            registry.register(ClientName::new(*name)).await.unwrap();
        }
        registry
            .create_group_for(ClientName::new(members[0]), GroupName::new("team"))
            .await
            .unwrap();
        for name in &members[1..] {
            registry
                .join_group(ClientName::new(*name), GroupName::new("team"))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = spawn_registry();
        setup_team(&registry, &["alice", "bob", "carol"]).await;
        let mut alice = registry.attach_inbox(ClientName::new("alice")).await.unwrap();
        let mut bob = registry.attach_inbox(ClientName::new("bob")).await.unwrap();
        let mut carol = registry.attach_inbox(ClientName::new("carol")).await.unwrap();

        let broadcaster = Broadcaster::new(registry, DeliveryPolicy::Block);
        let report = broadcaster
            .broadcast(&GroupName::new("team"), ChatMessage::new("alice", "team", "hi"))
            .await;

        assert_eq!(report, DeliveryReport { delivered: 2, dropped: 0 });
        assert_eq!(bob.try_recv().unwrap().body, "hi");
        assert_eq!(carol.try_recv().unwrap().body, "hi");
        assert!(alice.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_departure_echoes_to_sender() {
        let registry = spawn_registry();
        setup_team(&registry, &["alice", "bob"]).await;
        let mut alice = registry.attach_inbox(ClientName::new("alice")).await.unwrap();
        let mut bob = registry.attach_inbox(ClientName::new("bob")).await.unwrap();

        let broadcaster = Broadcaster::new(registry, DeliveryPolicy::Block);
        let departure = ChatMessage::departure(&ClientName::new("alice"), &GroupName::new("team"));
        let report = broadcaster.broadcast(&GroupName::new("team"), departure.clone()).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(alice.try_recv(), Some(departure.clone()));
        assert_eq!(bob.try_recv(), Some(departure));
    }

    #[tokio::test]
    async fn test_quoted_departure_is_not_echoed() {
        let registry = spawn_registry();
        setup_team(&registry, &["alice", "bob"]).await;
        let mut bob = registry.attach_inbox(ClientName::new("bob")).await.unwrap();

        let broadcaster = Broadcaster::new(registry, DeliveryPolicy::Block);
        let report = broadcaster
            .broadcast(
                &GroupName::new("team"),
                ChatMessage::new("bob", "team", "alice left chat!\n"),
            )
            .await;

        assert_eq!(report.delivered, 1);
        assert!(bob.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_missing_group_is_noop() {
        let registry = spawn_registry();
        let broadcaster = Broadcaster::new(registry, DeliveryPolicy::Block);

        let report = broadcaster
            .broadcast(&GroupName::new("nowhere"), ChatMessage::new("alice", "nowhere", "hi"))
            .await;

        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn test_drop_policy_skips_full_channel() {
        let registry = spawn_registry_with_capacity(1);
        setup_team(&registry, &["alice", "bob"]).await;
        let mut bob = registry.attach_inbox(ClientName::new("bob")).await.unwrap();

        let broadcaster = Broadcaster::new(registry, DeliveryPolicy::Drop);
        let team = GroupName::new("team");
        let first = broadcaster.broadcast(&team, ChatMessage::new("alice", "team", "one")).await;
        let second = broadcaster.broadcast(&team, ChatMessage::new("alice", "team", "two")).await;

        assert_eq!(first.delivered, 1);
        assert_eq!(second, DeliveryReport { delivered: 0, dropped: 1 });
        assert_eq!(bob.try_recv().unwrap().body, "one");
        assert!(bob.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_per_recipient_order_preserved() {
        let registry = spawn_registry();
        setup_team(&registry, &["alice", "bob"]).await;
        let mut bob = registry.attach_inbox(ClientName::new("bob")).await.unwrap();

        let broadcaster = Broadcaster::new(registry, DeliveryPolicy::Block);
        let team = GroupName::new("team");
        for i in 0..10 {
            broadcaster
                .broadcast(&team, ChatMessage::new("alice", "team", i.to_string()))
                .await;
        }

        for i in 0..10 {
            assert_eq!(bob.recv().await.unwrap().body, i.to_string());
        }
    }

    #[test]
    fn test_delivery_policy_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            delivery: DeliveryPolicy,
        }
        let parsed: Wrapper = toml::from_str("delivery = \"drop\"").unwrap();
        assert_eq!(parsed.delivery, DeliveryPolicy::Drop);
        assert_eq!(DeliveryPolicy::default(), DeliveryPolicy::Block);
    }
}
