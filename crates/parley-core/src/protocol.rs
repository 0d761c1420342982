//! Relay wire protocol.
//!
//! Control messages are JSON text frames of the shape
//! `{"type": ..., "content": ...}`. Synthesized audio is sent as a raw binary
//! frame per sentence unit, never wrapped in JSON.

use serde::{Deserialize, Serialize};

/// Status carried by a `{"type": "status"}` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The turn completed; always the last message of a turn.
    Done,
    /// The turn was aborted by a model failure.
    Error,
}

/// A JSON control frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Caption content: a streamed fragment or a full utterance.
    Text(String),
    /// What the relay believes the user said (structured mode only).
    Transcription(String),
    Status(TurnStatus),
}

/// A message produced by the reply pipeline, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Caption(String),
    Transcription(String),
    Audio(Vec<u8>),
    Status(TurnStatus),
}

/// Encoded transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl OutboundMessage {
    /// Encode for the transport.
    pub fn into_wire(self) -> Result<WireFrame, serde_json::Error> {
        let frame = match self {
            Self::Audio(bytes) => return Ok(WireFrame::Binary(bytes)),
            Self::Caption(text) => ControlFrame::Text(text),
            Self::Transcription(text) => ControlFrame::Transcription(text),
            Self::Status(status) => ControlFrame::Status(status),
        };
        Ok(WireFrame::Text(serde_json::to_string(&frame)?))
    }

    /// Whether this message ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Status(_))
    }
}

/// A complete user turn as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTurn {
    Text(String),
    Audio(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(frame: WireFrame) -> String {
        match frame {
            WireFrame::Text(s) => s,
            WireFrame::Binary(_) => panic!("expected a text frame"),
        }
    }

    #[test]
    fn test_caption_wire_shape() {
        let wire = OutboundMessage::Caption("你好，".into()).into_wire().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text_of(wire)).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["content"], "你好，");
    }

    #[test]
    fn test_status_done_wire_shape() {
        let wire = OutboundMessage::Status(TurnStatus::Done).into_wire().unwrap();
        assert_eq!(text_of(wire), r#"{"type":"status","content":"done"}"#);
    }

    #[test]
    fn test_transcription_wire_shape() {
        let wire = OutboundMessage::Transcription("hello".into())
            .into_wire()
            .unwrap();
        assert_eq!(text_of(wire), r#"{"type":"transcription","content":"hello"}"#);
    }

    #[test]
    fn test_audio_is_raw_binary() {
        let wire = OutboundMessage::Audio(vec![1, 2, 3]).into_wire().unwrap();
        assert_eq!(wire, WireFrame::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn test_control_frame_parses_back() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"type":"status","content":"error"}"#).unwrap();
        assert_eq!(frame, ControlFrame::Status(TurnStatus::Error));
        assert!(OutboundMessage::Status(TurnStatus::Error).is_terminal());
        assert!(!OutboundMessage::Caption("x".into()).is_terminal());
    }
}
