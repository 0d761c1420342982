//! Parsing of single-shot structured replies.

use serde::Deserialize;
use thiserror::Error;

use parley_core::error::ParleyError;

/// A reply carrying both the transcription of a spoken turn and the answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StructuredReply {
    #[serde(default)]
    pub user_transcription: String,
    #[serde(default)]
    pub assistant_response: String,
}

#[derive(Debug, Error)]
pub enum StructuredParseError {
    #[error("reply is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StructuredParseError> for ParleyError {
    fn from(e: StructuredParseError) -> Self {
        ParleyError::StructuredParse(e.to_string())
    }
}

/// Remove code-fence markers the model wraps around JSON.
pub fn strip_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parse a raw model reply into a [`StructuredReply`].
pub fn parse_structured_reply(raw: &str) -> Result<StructuredReply, StructuredParseError> {
    Ok(serde_json::from_str(&strip_fences(raw))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let reply =
            parse_structured_reply(r#"{"user_transcription":"你好","assistant_response":"你好呀！"}"#)
                .unwrap();
        assert_eq!(reply.user_transcription, "你好");
        assert_eq!(reply.assistant_response, "你好呀！");
    }

    #[test]
    fn test_fenced_json() {
        let raw = "```json\n{\"user_transcription\": \"几点了\", \"assistant_response\": \"三点。\"}\n```";
        let reply = parse_structured_reply(raw).unwrap();
        assert_eq!(reply.user_transcription, "几点了");
        assert_eq!(reply.assistant_response, "三点。");
    }

    #[test]
    fn test_missing_field_defaults_to_empty() {
        let reply = parse_structured_reply(r#"{"assistant_response":"嗯。"}"#).unwrap();
        assert!(reply.user_transcription.is_empty());
    }

    #[test]
    fn test_prose_is_rejected() {
        assert!(parse_structured_reply("当然可以，我们开始吧。").is_err());
        assert!(parse_structured_reply("[1, 2]").is_err());
    }

    #[test]
    fn test_parse_error_kind() {
        let err = parse_structured_reply("不是 JSON").unwrap_err();
        assert_eq!(ParleyError::from(err).kind(), "structured_parse");
    }
}
