//! GPT-SoVITS api v2 backend.
//!
//! `POST /tts` returns the encoded audio for one request. Weights are switched
//! with `GET /set_gpt_weights` and `GET /set_sovits_weights`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use parley_core::config::TtsConfig;

use crate::SpeechBackend;

/// Body of a `/tts` request.
#[derive(Debug, Clone, Serialize)]
pub struct SovitsRequest<'a> {
    pub text: &'a str,
    pub text_lang: &'a str,
    pub ref_audio_path: Option<String>,
    pub prompt_text: &'a str,
    pub prompt_lang: &'a str,
    pub top_k: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub text_split_method: &'a str,
    pub batch_size: u32,
    pub speed_factor: f64,
    pub streaming_mode: bool,
    pub media_type: &'a str,
    pub parallel_infer: bool,
    pub repetition_penalty: f64,
}

pub struct SovitsBackend {
    config: TtsConfig,
    base_url: String,
    client: reqwest::Client,
}

impl SovitsBackend {
    pub fn new(config: TtsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    /// Request body for `text` with the configured voice.
    pub fn request<'a>(&'a self, text: &'a str) -> SovitsRequest<'a> {
        let c = &self.config;
        SovitsRequest {
            text,
            text_lang: &c.text_lang,
            ref_audio_path: c.ref_audio_path(),
            prompt_text: &c.prompt_text,
            prompt_lang: &c.prompt_lang,
            top_k: c.top_k,
            top_p: c.top_p,
            temperature: c.temperature,
            text_split_method: &c.text_split_method,
            batch_size: c.batch_size,
            speed_factor: c.speed_factor,
            streaming_mode: false,
            media_type: &c.media_type,
            parallel_infer: c.parallel_infer,
            repetition_penalty: c.repetition_penalty,
        }
    }

    async fn set_weights(&self, endpoint: &str, path: &str) -> anyhow::Result<()> {
        let url = format!("{}/{endpoint}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("weights_path", path)])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("{endpoint} failed {status}: {body}");
        }

        info!(endpoint, path, "Voice weights set");
        Ok(())
    }
}

#[async_trait]
impl SpeechBackend for SovitsBackend {
    fn id(&self) -> &str {
        "gpt-sovits"
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!("{}/tts", self.base_url);
        debug!(text_len = text.len(), "Requesting synthesis");

        let resp = self
            .client
            .post(&url)
            .json(&self.request(text))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("TTS backend error {status}: {body}");
        }

        Ok(resp.bytes().await?.to_vec())
    }

    async fn select_weights(&self) -> anyhow::Result<()> {
        if let Some(path) = self.config.gpt_weights_path() {
            self.set_weights("set_gpt_weights", &path).await?;
        }
        if let Some(path) = self.config.sovits_weights_path() {
            self.set_weights("set_sovits_weights", &path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_voice_config() {
        let config = TtsConfig {
            ref_audio_path: Some("/voices/ref.wav".into()),
            prompt_text: "参考文本".into(),
            ..TtsConfig::default()
        };
        let backend = SovitsBackend::new(config).unwrap();
        let body = serde_json::to_value(backend.request("你好")).unwrap();

        assert_eq!(body["text"], "你好");
        assert_eq!(body["ref_audio_path"], "/voices/ref.wav");
        assert_eq!(body["prompt_text"], "参考文本");
        assert_eq!(body["text_lang"], "zh");
        assert_eq!(body["top_k"], 5);
        assert_eq!(body["repetition_penalty"], 1.35);
        assert_eq!(body["media_type"], "wav");
        assert_eq!(body["streaming_mode"], false);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = TtsConfig {
            base_url: "http://tts.local:9880/".into(),
            ..TtsConfig::default()
        };
        let backend = SovitsBackend::new(config).unwrap();
        assert_eq!(backend.base_url, "http://tts.local:9880");
    }

    #[tokio::test]
    async fn test_no_weights_configured_is_noop() {
        // Nothing is requested, so an unreachable backend does not matter
        let config = TtsConfig {
            base_url: "http://127.0.0.1:1".into(),
            ..TtsConfig::default()
        };
        let backend = SovitsBackend::new(config).unwrap();
        assert!(backend.select_weights().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_backend_errors() {
        let config = TtsConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_secs: 2,
            ..TtsConfig::default()
        };
        let backend = SovitsBackend::new(config).unwrap();
        assert!(backend.synthesize("你好").await.is_err());
    }
}
