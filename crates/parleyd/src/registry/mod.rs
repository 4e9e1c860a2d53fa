//! Client registry and group store using the Actor pattern.
//!
//! The registry is the single source of truth for registered clients,
//! their delivery channels, and group memberships. It receives commands via
//! a tokio mpsc channel and answers each on a oneshot channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                      ┌─────────────────┐
//! │ Control facade  │──┐                   │                 │
//! └─────────────────┘  │  RegistryCommand  │  RegistryActor  │
//! ┌─────────────────┐  ├──────────────────▶│                 │
//! │  Chat sessions  │──┤  (mpsc channel)   │ clients: name → │
//! └─────────────────┘  │                   │   groups, inbox │
//! ┌─────────────────┐  │                   │ groups: name →  │
//! │   Broadcaster   │──┘                   │   kind, members │
//! └─────────────────┘                      └─────────────────┘
//!         │                                        │
//!         │  DeliveryTargets snapshot (oneshot)    │
//!         ◀────────────────────────────────────────┘
//!         │
//!         ▼
//!   per-client delivery channels (bounded mpsc)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{DeliveryTarget, Inbox, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Default capacity of each client's delivery channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// Uses [`DEFAULT_CHANNEL_CAPACITY`] for client delivery channels.
///
/// # Example
///
/// ```no_run
/// use parleyd::registry::spawn_registry;
/// use parley_core::ClientName;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///     let _ = handle.register(ClientName::new("alice")).await;
///     let clients = handle.list_clients().await;
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    spawn_registry_with_capacity(DEFAULT_CHANNEL_CAPACITY)
}

/// Spawn the registry actor with a custom delivery channel capacity.
pub fn spawn_registry_with_capacity(channel_capacity: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, channel_capacity);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
