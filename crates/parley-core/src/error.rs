//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A client or group name failed validation
    #[error("Invalid {kind} name {value:?}: {reason}")]
    InvalidName {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    /// A group name that was expected to encode an invitation does not
    #[error("Not an invitation: {0}")]
    NotAnInvitation(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
