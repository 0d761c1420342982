use serde::{Deserialize, Serialize};

/// Speaker of a chat history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

/// Content block in a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// Raw media bytes sent inline (e.g. a spoken turn).
    #[serde(rename = "inline_data")]
    InlineData { mime_type: String, data: Vec<u8> },
}

/// One entry of a chat session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// The user's side of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Text(String),
    Audio {
        mime_type: String,
        data: Vec<u8>,
        /// Instruction sent alongside the audio (e.g. the reply format).
        prompt: Option<String>,
    },
}

impl UserInput {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }

    /// Content blocks for this input, prompt text first.
    pub fn to_content(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            Self::Audio {
                mime_type,
                data,
                prompt,
            } => {
                let mut blocks = Vec::with_capacity(2);
                if let Some(prompt) = prompt {
                    blocks.push(ContentBlock::Text {
                        text: prompt.clone(),
                    });
                }
                blocks.push(ContentBlock::InlineData {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                });
                blocks
            }
        }
    }

    /// Size of the input for log fields: characters for text, bytes for audio.
    pub fn size(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::Audio { data, .. } => data.len(),
        }
    }
}

impl ChatEntry {
    pub fn user(input: &UserInput) -> Self {
        Self {
            role: Role::User,
            content: input.to_content(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}
