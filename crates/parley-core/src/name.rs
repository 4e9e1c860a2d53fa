//! Type-safe identifiers for clients and groups.
//!
//! Both names are the primary keys of their entities: the broker never
//! hands out numeric ids, everything is referenced by name.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::{DomainError, DomainResult};
use crate::group::INVITATION_SEPARATOR;

// ============================================================================
// Client Name
// ============================================================================

/// Unique name of a registered chat client.
///
/// Serialized as a bare string so the chat message wire shape stays
/// `{ sender, receiver, body }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientName(String);

impl ClientName {
    /// Creates a client name without validation.
    ///
    /// Names arriving over the wire are checked with [`ClientName::validate`]
    /// before they reach the registry.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a validated client name.
    pub fn parse(name: impl Into<String>) -> DomainResult<Self> {
        let name = Self(name.into());
        name.validate()?;
        Ok(name)
    }

    /// Checks the name is usable as a registry key.
    ///
    /// Client names may not contain the invitation separator, otherwise
    /// `"<inviter>+<invitee>"` group names would be ambiguous.
    pub fn validate(&self) -> DomainResult<()> {
        check_common("client", &self.0)?;
        if self.0.contains(INVITATION_SEPARATOR) {
            return Err(DomainError::InvalidName {
                kind: "client",
                value: self.0.clone(),
                reason: "must not contain '+'",
            });
        }
        Ok(())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ClientName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Group Name
// ============================================================================

/// Unique name of a chat group.
///
/// A name containing `+` encodes a pending 1:1 invitation; see
/// [`crate::Invitation`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupName(String);

impl GroupName {
    /// Creates a group name without validation.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a validated group name.
    pub fn parse(name: impl Into<String>) -> DomainResult<Self> {
        let name = Self(name.into());
        name.validate()?;
        Ok(name)
    }

    /// Checks the name is usable as a registry key.
    pub fn validate(&self) -> DomainResult<()> {
        check_common("group", &self.0)
    }

    /// Returns true if this name uses the invitation encoding.
    #[must_use]
    pub fn is_invitation(&self) -> bool {
        self.0.contains(INVITATION_SEPARATOR)
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for GroupName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GroupName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for GroupName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for GroupName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Validation shared by both name kinds.
fn check_common(kind: &'static str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::InvalidName {
            kind,
            value: value.to_string(),
            reason: "must not be empty",
        });
    }
    if value.chars().any(char::is_control) {
        return Err(DomainError::InvalidName {
            kind,
            value: value.to_string(),
            reason: "must not contain control characters",
        });
    }
    Ok(())
}
