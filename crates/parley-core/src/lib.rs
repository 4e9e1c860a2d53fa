//! Parley Core - Shared domain types for the group-chat broker
//!
//! This crate provides the domain types shared between
//! the broker (parleyd), the wire protocol and the client library.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod group;
pub mod message;
pub mod name;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use group::{GroupKind, GroupListing, Invitation, INVITATION_SEPARATOR};
pub use message::{departure_body, ChatMessage, MessageKind, DEPARTURE_SUFFIX};
pub use name::{ClientName, GroupName};
