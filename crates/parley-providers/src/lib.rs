//! Language model provider abstraction and chat sessions.
//!
//! A provider implements [`LlmProvider`] to stream or complete a chat turn.
//! [`ChatSession`] owns the conversation history for one connection and
//! builds each request from it.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use parley_core::config::ModelConfig;
use parley_core::types::ChatEntry;

pub mod google;
pub mod session;
pub mod sse;

pub use session::{ChatSession, SessionSettings};

/// Credentials for authenticating with an LLM provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
    /// For local providers and test doubles.
    #[serde(rename = "none")]
    None,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey { .. } => f.write_str("ApiKey(***)"),
            Self::None => f.write_str("None"),
        }
    }
}

/// A request to the LLM.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatEntry>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub system: Option<String>,
}

/// A streamed chunk from the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub delta: Option<String>,
    pub usage: Option<ChunkUsage>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Single-pass stream of reply chunks.
pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<CompletionChunk>> + Send>>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "google").
    fn id(&self) -> &str;

    /// Stream a chat completion.
    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<TokenStream>;

    /// Produce the whole reply in one call.
    async fn complete(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<String>;
}

/// Build the provider named in the model config, with its credentials.
pub fn build_provider(config: &ModelConfig) -> anyhow::Result<(Arc<dyn LlmProvider>, Credentials)> {
    let credentials = match config.resolve_api_key() {
        Some(api_key) => Credentials::ApiKey { api_key },
        None => Credentials::None,
    };

    let provider: Arc<dyn LlmProvider> = match config.provider.as_str() {
        "google" => Arc::new(google::GeminiProvider::new(config.base_url.as_deref())),
        other => anyhow::bail!("Unknown model provider: {other}"),
    };

    Ok((provider, credentials))
}
