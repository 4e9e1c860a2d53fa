//! Parley Protocol - Wire protocol for broker communication
//!
//! Newline-delimited JSON over TCP. A connection starts in control mode:
//! a `connect` handshake followed by request/response pairs. A
//! `route_chat` request switches it into chat-stream mode, where every
//! line in either direction is a [`parley_core::ChatMessage`].

pub mod frame;
pub mod message;
pub mod version;

pub use frame::{decode_line, encode_line, FrameError, StreamFrame, MAX_LINE_SIZE};
pub use message::{ClientMessage, ErrorCode, MessageType, ServerMessage};
pub use version::ProtocolVersion;
