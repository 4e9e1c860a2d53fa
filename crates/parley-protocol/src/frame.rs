//! Line framing shared by the broker and the client library.

use parley_core::ChatMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::ServerMessage;

/// Maximum accepted line length (1 MB)
pub const MAX_LINE_SIZE: usize = 1_048_576;

/// A line received by a client in chat-stream mode.
///
/// The broker only writes chat messages on a stream, except for a single
/// error line when it refuses the stream's first message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamFrame {
    Chat(ChatMessage),
    Server(ServerMessage),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Line too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Serializes `value` as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, FrameError> {
    let mut line = serde_json::to_string(value).map_err(|e| FrameError::Parse(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parses one line (trailing newline optional).
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    if line.len() > MAX_LINE_SIZE {
        return Err(FrameError::TooLarge {
            size: line.len(),
            max: MAX_LINE_SIZE,
        });
    }
    serde_json::from_str(line.trim_end_matches(['\r', '\n']))
        .map_err(|e| FrameError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorCode;

    #[test]
    fn test_encode_line_terminates_with_newline() {
        let line = encode_line(&ChatMessage::new("alice", "team", "hi")).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_body_newline_stays_escaped() {
        let msg = ChatMessage::new("alice", "team", "alice left chat!\n");
        let line = encode_line(&msg).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: ChatMessage = decode_line(&line).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_stream_frame_distinguishes_chat_and_error() {
        let chat: StreamFrame =
            decode_line(r#"{"sender":"alice","receiver":"team","body":"hi"}"#).unwrap();
        assert!(matches!(chat, StreamFrame::Chat(_)));

        let error: StreamFrame =
            decode_line(r#"{"type":"error","code":"not_registered","message":"nope"}"#).unwrap();
        assert!(matches!(
            error,
            StreamFrame::Server(ServerMessage::Error {
                code: ErrorCode::NotRegistered,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let line = "x".repeat(MAX_LINE_SIZE + 1);
        let result: Result<ChatMessage, _> = decode_line(&line);
        assert!(matches!(result, Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_decode_reports_malformed_json() {
        let result: Result<ChatMessage, _> = decode_line("{not json");
        assert!(matches!(result, Err(FrameError::Parse(_))));
    }
}
