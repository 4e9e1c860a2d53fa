//! Chat messages and the departure sentinel.
//!
//! The wire shape `{ sender, receiver, body }` is stable. A body equal to
//! `"<sender> left chat!\n"` doubles as the voluntary-departure signal; the
//! comparison lives in [`ChatMessage::kind`] and nowhere else.

use serde::{Deserialize, Serialize};

use crate::name::{ClientName, GroupName};

/// Suffix appended to the sender's name to form the departure sentinel.
pub const DEPARTURE_SUFFIX: &str = " left chat!\n";

/// One chat message as carried on a chat stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: ClientName,
    /// Nominal target group. Routing uses the group pinned by the first
    /// message of the stream, not this field.
    pub receiver: GroupName,
    pub body: String,
}

/// Classification of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Ordinary chat text
    Chat,
    /// The sender is leaving the group
    Departure,
}

impl ChatMessage {
    pub fn new(
        sender: impl Into<ClientName>,
        receiver: impl Into<GroupName>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            body: body.into(),
        }
    }

    /// Builds the departure notice for `sender` leaving `group`.
    pub fn departure(sender: &ClientName, group: &GroupName) -> Self {
        Self::new(sender.clone(), group.clone(), departure_body(sender))
    }

    /// Classifies this message. The body must match the sentinel for this
    /// message's own sender bit for bit.
    pub fn kind(&self) -> MessageKind {
        let name = self.sender.as_str();
        let is_departure = self.body.len() == name.len() + DEPARTURE_SUFFIX.len()
            && self.body.starts_with(name)
            && self.body.ends_with(DEPARTURE_SUFFIX);

        if is_departure {
            MessageKind::Departure
        } else {
            MessageKind::Chat
        }
    }

    #[must_use]
    pub fn is_departure(&self) -> bool {
        self.kind() == MessageKind::Departure
    }

    /// Returns true if this is `client`'s own departure notice.
    #[must_use]
    pub fn is_departure_of(&self, client: &ClientName) -> bool {
        &self.sender == client && self.is_departure()
    }

    /// Returns the message re-attributed to `sender`.
    pub fn with_sender(mut self, sender: &ClientName) -> Self {
        if &self.sender != sender {
            self.sender = sender.clone();
        }
        self
    }
}

/// Sentinel body for `sender`: `"<sender> left chat!\n"`.
pub fn departure_body(sender: &ClientName) -> String {
    format!("{sender}{DEPARTURE_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_departure_body_is_bit_exact() {
        let msg = ChatMessage::departure(&ClientName::new("alice"), &GroupName::new("team"));
        assert_eq!(msg.body, "alice left chat!\n");
        assert_eq!(msg.receiver.as_str(), "team");
        assert_eq!(msg.kind(), MessageKind::Departure);
    }

    #[test]
    fn test_ordinary_message_is_chat() {
        let msg = ChatMessage::new("alice", "team", "hi");
        assert_eq!(msg.kind(), MessageKind::Chat);
        assert!(!msg.is_departure());
    }

    #[test]
    fn test_someone_elses_sentinel_is_chat() {
        // bob quoting alice's departure line is not alice leaving
        let msg = ChatMessage::new("bob", "team", "alice left chat!\n");
        assert_eq!(msg.kind(), MessageKind::Chat);
    }

    #[test]
    fn test_sentinel_requires_trailing_newline() {
        let msg = ChatMessage::new("alice", "team", "alice left chat!");
        assert!(!msg.is_departure());
    }

    #[test]
    fn test_is_departure_of() {
        let alice = ClientName::new("alice");
        let msg = ChatMessage::departure(&alice, &GroupName::new("team"));
        assert!(msg.is_departure_of(&alice));
        assert!(!msg.is_departure_of(&ClientName::new("bob")));
    }

    #[test]
    fn test_with_sender_rewrites() {
        let msg = ChatMessage::new("mallory", "team", "hi").with_sender(&ClientName::new("alice"));
        assert_eq!(msg.sender.as_str(), "alice");
    }

    #[test]
    fn test_wire_shape() {
        let msg = ChatMessage::new("alice", "team", "hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"sender":"alice","receiver":"team","body":"hi"}"#);
    }
}
