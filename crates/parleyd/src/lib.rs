//! parley broker - client/group registry and chat routing server
//!
//! This crate provides the core infrastructure for the parley broker:
//! - `registry` - Actor owning registered clients, groups and delivery channels
//! - `broadcast` - Group fan-out of chat messages
//! - `service` - Control facade behind every control request
//! - `server` - TCP listener, control connections and chat stream routing
//! - `auth` - Shared-password login tokens
//! - `config` - Broker settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       parleyd broker                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   ChatServer    │────▶│     RegistryActor           │   │
//! │  │     (TCP)       │     │  (clients + groups owner)   │   │
//! │  └────────┬────────┘     └──────────────▲──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ snapshots         │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐   │
//! │  │ConnectionHandler│────▶│       Broadcaster           │   │
//! │  │ / ChatSession   │     │  (per-client mpsc delivery) │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod registry;
pub mod server;
pub mod service;

use crate::auth::TokenStore;
use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::registry::spawn_registry_with_capacity;
use crate::service::ChatService;

/// Spawns the registry actor and wires up the shared broker state.
///
/// Must be called from within a tokio runtime.
pub fn build_service(config: &ServerConfig) -> ChatService {
    let registry = spawn_registry_with_capacity(config.channel_capacity);
    let broadcaster = Broadcaster::new(registry, config.delivery);
    ChatService::new(broadcaster, TokenStore::new(config.password.clone()))
        .with_broadcast_timeout(config.write_timeout())
}
