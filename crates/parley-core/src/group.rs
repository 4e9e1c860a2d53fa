//! Group kinds and the `"<inviter>+<invitee>"` invitation encoding.
//!
//! Invitations are not first-class entities on the wire: an invitation is a
//! group whose name joins the inviter and invitee with [`INVITATION_SEPARATOR`].
//! Inside the broker every group carries a [`GroupKind`] tag instead, and
//! consumers of a group listing split it with [`GroupListing::partition`].

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::name::{ClientName, GroupName};

/// Separator between inviter and invitee in an invitation group name.
pub const INVITATION_SEPARATOR: char = '+';

/// A pending 1:1 chat request from `inviter` to `invitee`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Invitation {
    pub inviter: ClientName,
    pub invitee: ClientName,
}

impl Invitation {
    pub fn new(inviter: impl Into<ClientName>, invitee: impl Into<ClientName>) -> Self {
        Self {
            inviter: inviter.into(),
            invitee: invitee.into(),
        }
    }

    /// Decodes an invitation from a group name.
    ///
    /// The inviter is everything before the first separator, the invitee
    /// everything after it. Returns `None` for ordinary group names.
    pub fn from_group_name(name: &GroupName) -> Option<Self> {
        name.as_str()
            .split_once(INVITATION_SEPARATOR)
            .map(|(inviter, invitee)| Self::new(inviter, invitee))
    }

    /// Like [`Invitation::from_group_name`] but as an error for callers
    /// that require an invitation.
    pub fn try_from_group_name(name: &GroupName) -> DomainResult<Self> {
        Self::from_group_name(name).ok_or_else(|| DomainError::NotAnInvitation(name.to_string()))
    }

    /// Encodes the invitation as its wire group name.
    pub fn group_name(&self) -> GroupName {
        GroupName::new(format!(
            "{}{INVITATION_SEPARATOR}{}",
            self.inviter, self.invitee
        ))
    }

    /// Returns true if `client` is the addressee.
    pub fn is_addressed_to(&self, client: &ClientName) -> bool {
        &self.invitee == client
    }
}

/// Kind tag stored with every group in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupKind {
    /// Ordinary joinable chat room
    Room,
    /// Two-person inbox created by an invitation
    Invitation(Invitation),
}

impl GroupKind {
    /// Classifies a group by its name.
    pub fn of(name: &GroupName) -> Self {
        match Invitation::from_group_name(name) {
            Some(invitation) => Self::Invitation(invitation),
            None => Self::Room,
        }
    }

    #[must_use]
    pub fn is_invitation(&self) -> bool {
        matches!(self, Self::Invitation(_))
    }
}

/// A group list split into joinable rooms and pending invitations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupListing {
    pub rooms: Vec<GroupName>,
    pub invitations: Vec<Invitation>,
}

impl GroupListing {
    /// Partitions a mixed list as returned by the group-list operation.
    pub fn partition<I>(names: I) -> Self
    where
        I: IntoIterator<Item = GroupName>,
    {
        let mut listing = Self::default();
        for name in names {
            match GroupKind::of(&name) {
                GroupKind::Room => listing.rooms.push(name),
                GroupKind::Invitation(invitation) => listing.invitations.push(invitation),
            }
        }
        listing
    }

    /// Invitations whose invitee is `client`.
    pub fn invitations_for<'a>(
        &'a self,
        client: &'a ClientName,
    ) -> impl Iterator<Item = &'a Invitation> + 'a {
        self.invitations
            .iter()
            .filter(move |invitation| invitation.is_addressed_to(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invitation_roundtrip_through_group_name() {
        let invitation = Invitation::new("alice", "bob");
        let name = invitation.group_name();
        assert_eq!(name.as_str(), "alice+bob");
        assert_eq!(Invitation::from_group_name(&name), Some(invitation));
    }

    #[test]
    fn test_invitation_splits_on_first_separator() {
        let invitation = Invitation::from_group_name(&GroupName::new("a+b+c")).unwrap();
        assert_eq!(invitation.inviter.as_str(), "a");
        assert_eq!(invitation.invitee.as_str(), "b+c");
    }

    #[test]
    fn test_room_is_not_invitation() {
        assert_eq!(GroupKind::of(&GroupName::new("team")), GroupKind::Room);
        assert!(Invitation::try_from_group_name(&GroupName::new("team")).is_err());
    }

    #[test]
    fn test_partition_mixed_listing() {
        let listing = GroupListing::partition(vec![
            GroupName::new("team"),
            GroupName::new("alice+bob"),
            GroupName::new("ops"),
            GroupName::new("carol+alice"),
        ]);

        assert_eq!(listing.rooms, vec![GroupName::new("team"), GroupName::new("ops")]);
        assert_eq!(listing.invitations.len(), 2);

        let bob = ClientName::new("bob");
        let for_bob: Vec<_> = listing.invitations_for(&bob).collect();
        assert_eq!(for_bob, vec![&Invitation::new("alice", "bob")]);
    }
}
