//! Google Generative AI (Gemini) provider.
//!
//! Streaming uses `streamGenerateContent` with SSE; single-shot replies use
//! `generateContent`. Audio turns are sent as base64 `inlineData` parts.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use parley_core::types::{ChatEntry, ContentBlock, Role};

use crate::sse::parse_sse_stream;
use crate::{ChunkUsage, CompletionChunk, CompletionRequest, Credentials, LlmProvider, TokenStream};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_key(credentials: &Credentials) -> anyhow::Result<&str> {
        match credentials {
            Credentials::ApiKey { api_key } => Ok(api_key),
            Credentials::None => anyhow::bail!("Gemini requires ApiKey credentials"),
        }
    }

    fn build_body(request: &CompletionRequest) -> GeminiRequest {
        GeminiRequest {
            contents: format_messages(&request.messages),
            system_instruction: request.system.as_ref().map(|s| {
                json!({
                    "parts": [{ "text": s }]
                })
            }),
            generation_config: Some(GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            }),
        }
    }

    async fn post(
        &self,
        url: &str,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<reqwest::Response> {
        let api_key = Self::api_key(credentials)?;
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&Self::build_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {status}: {body}");
        }

        Ok(response)
    }
}

/// Map chat history to Gemini `contents`.
pub fn format_messages(entries: &[ChatEntry]) -> Vec<serde_json::Value> {
    entries
        .iter()
        .filter_map(|entry| {
            let parts: Vec<serde_json::Value> = entry
                .content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => json!({ "text": text }),
                    ContentBlock::InlineData { mime_type, data } => json!({
                        "inlineData": {
                            "mimeType": mime_type,
                            "data": base64::engine::general_purpose::STANDARD.encode(data),
                        }
                    }),
                })
                .collect();
            if parts.is_empty() {
                return None;
            }
            let role = match entry.role {
                Role::User => "user",
                Role::Model => "model",
            };
            Some(json!({ "role": role, "parts": parts }))
        })
        .collect()
}

// --- Gemini request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

/// Shape shared by `generateContent` responses and each streamed chunk.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Turn one SSE payload into a chunk. `None` skips payloads that carry nothing.
fn parse_stream_event(data: &str) -> Option<anyhow::Result<CompletionChunk>> {
    let response: GeminiResponse = match serde_json::from_str(data.trim()) {
        Ok(r) => r,
        Err(e) => {
            trace!(%e, "Failed to parse Gemini chunk");
            return None;
        }
    };

    if let Some(err) = &response.error {
        return Some(Err(anyhow::anyhow!(
            "Gemini stream error {}: {}",
            err.code,
            err.message
        )));
    }

    let chunk = CompletionChunk {
        delta: response.text(),
        usage: response.usage_metadata.as_ref().map(|u| ChunkUsage {
            input_tokens: Some(u.prompt_token_count),
            output_tokens: Some(u.candidates_token_count),
        }),
        stop_reason: response
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone()),
    };

    if chunk.delta.is_none() && chunk.usage.is_none() && chunk.stop_reason.is_none() {
        return None;
    }
    Some(Ok(chunk))
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        "google"
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<TokenStream> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );

        debug!(model = %request.model, turns = request.messages.len(), "Streaming Gemini API");

        let response = self.post(&url, request, credentials).await?;

        let chunks = parse_sse_stream(response).filter_map(|event| match event {
            Ok(event) => parse_stream_event(&event.data),
            Err(e) => Some(Err(e)),
        });

        Ok(Box::pin(chunks))
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );

        debug!(model = %request.model, turns = request.messages.len(), "Calling Gemini API");

        let response: GeminiResponse = self.post(&url, request, credentials).await?.json().await?;

        if let Some(err) = &response.error {
            anyhow::bail!("Gemini API error {}: {}", err.code, err.message);
        }

        match response.text() {
            Some(text) => Ok(text),
            None => {
                let reason = response
                    .candidates
                    .first()
                    .and_then(|c| c.finish_reason.clone())
                    .or_else(|| response.prompt_feedback.map(|f| f.to_string()))
                    .unwrap_or_else(|| "no candidates".into());
                anyhow::bail!("Gemini returned no text ({reason})")
            }
        }
    }
}
