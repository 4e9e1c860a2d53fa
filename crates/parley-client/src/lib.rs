//! Client library for the parley chat broker.
//!
//! - [`ChatClient`] issues control requests (register, groups, listings)
//! - [`ChatStream`] carries chat messages for one client and group
//!
//! A chat stream is a control connection switched into streaming mode, so
//! a typical session opens one [`ChatClient`] for bookkeeping and one
//! [`ChatStream`] per conversation.

pub mod client;
pub mod error;

pub use client::{ChatClient, ChatReceiver, ChatSender, ChatStream, ClientConfig, DEFAULT_ADDR};
pub use error::{ClientError, Result};
