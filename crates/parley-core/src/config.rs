//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Punctuation marks that end a sentence unit unless configured otherwise:
/// full- and half-width comma, period, exclamation, question mark, semicolon.
pub const DEFAULT_TERMINATORS: &str = "，,。.！!？?；;";

/// Top-level Parley configuration.
///
/// Every section is optional; accessors fall back to defaults so an empty
/// file (or no file at all) yields a runnable relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Websocket route (default: "/ws/chat").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Outbound messages buffered per connection before the pipeline waits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_buffer: Option<usize>,

    /// Largest accepted inbound frame in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_bytes: Option<usize>,
}

fn default_port() -> u16 {
    8000
}

/// Language model (chat session) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider id (default: "google").
    #[serde(default = "default_model_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key (default: "GEMINI_API_KEY").
    #[serde(default = "default_model_api_key_env")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model name (default: "gemini-2.0-flash").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Persona prompt replacing the built-in one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// User/model exchanges kept in a session's history (default: 20).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history_turns: Option<usize>,
}

fn default_model_provider() -> String {
    "google".into()
}

fn default_model_api_key_env() -> Option<String> {
    Some("GEMINI_API_KEY".into())
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            api_key: None,
            api_key_env: default_model_api_key_env(),
            base_url: None,
            model: None,
            max_tokens: None,
            temperature: None,
            system_prompt: None,
            max_history_turns: None,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: check `api_key` first, then `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech synthesis backend (GPT-SoVITS api v2) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_base_url")]
    pub base_url: String,

    /// Reference audio on the backend host that defines the voice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_audio_path: Option<String>,

    /// Transcript of the reference audio.
    #[serde(default)]
    pub prompt_text: String,

    #[serde(default = "default_lang")]
    pub prompt_lang: String,

    /// Language of the text being synthesized.
    #[serde(default = "default_lang")]
    pub text_lang: String,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default = "default_one")]
    pub top_p: f64,

    #[serde(default = "default_one")]
    pub temperature: f64,

    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_one")]
    pub speed_factor: f64,

    #[serde(default = "default_text_split_method")]
    pub text_split_method: String,

    /// Output container (default: "wav").
    #[serde(default = "default_media_type")]
    pub media_type: String,

    #[serde(default = "default_true")]
    pub parallel_infer: bool,

    /// GPT weights selected once at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_weights_path: Option<String>,

    /// SoVITS weights selected once at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sovits_weights_path: Option<String>,

    /// Per-request timeout in seconds (default: 60).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tts_base_url() -> String {
    "http://127.0.0.1:9880".into()
}

fn default_lang() -> String {
    "zh".into()
}

fn default_top_k() -> u32 {
    5
}

fn default_one() -> f64 {
    1.0
}

fn default_repetition_penalty() -> f64 {
    1.35
}

fn default_batch_size() -> u32 {
    1
}

fn default_text_split_method() -> String {
    "cut5".into()
}

fn default_media_type() -> String {
    "wav".into()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_tts_base_url(),
            ref_audio_path: None,
            prompt_text: String::new(),
            prompt_lang: default_lang(),
            text_lang: default_lang(),
            top_k: default_top_k(),
            top_p: default_one(),
            temperature: default_one(),
            repetition_penalty: default_repetition_penalty(),
            batch_size: default_batch_size(),
            speed_factor: default_one(),
            text_split_method: default_text_split_method(),
            media_type: default_media_type(),
            parallel_infer: true,
            gpt_weights_path: None,
            sovits_weights_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TtsConfig {
    /// Reference audio path with `~` expanded.
    pub fn ref_audio_path(&self) -> Option<String> {
        self.ref_audio_path.as_deref().map(expand_path)
    }

    pub fn gpt_weights_path(&self) -> Option<String> {
        self.gpt_weights_path.as_deref().map(expand_path)
    }

    pub fn sovits_weights_path(&self) -> Option<String> {
        self.sovits_weights_path.as_deref().map(expand_path)
    }
}

/// How a turn's reply is processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSelection {
    /// Audio turns use structured mode, text turns use streaming mode.
    #[default]
    Auto,
    Streaming,
    Structured,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: ModeSelection,

    /// Every character of this string ends a sentence unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminators: Option<String>,

    /// Longest wait for the next model chunk, in seconds (default: 60).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_idle_timeout_secs: Option<u64>,

    /// MIME type declared for binary audio turns (default: "audio/wav").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_mime_type: Option<String>,

    /// Instruction sent with each structured-mode turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Extra `EnvFilter` directives, e.g. "parley_agent=debug".
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output stream: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

fn expand_path(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted).map_err(|e| crate::error::ParleyError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json5")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn ws_path(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.path.clone())
            .unwrap_or_else(|| "/ws/chat".to_string())
    }

    pub fn outbound_buffer(&self) -> usize {
        self.gateway
            .as_ref()
            .and_then(|g| g.outbound_buffer)
            .unwrap_or(64)
            .max(1)
    }

    pub fn max_message_bytes(&self) -> usize {
        self.gateway
            .as_ref()
            .and_then(|g| g.max_message_bytes)
            .unwrap_or(16 * 1024 * 1024)
    }

    /// Model section, or defaults.
    pub fn model(&self) -> ModelConfig {
        self.model.clone().unwrap_or_default()
    }

    pub fn model_name(&self) -> String {
        self.model
            .as_ref()
            .and_then(|m| m.model.clone())
            .unwrap_or_else(|| "gemini-2.0-flash".to_string())
    }

    pub fn max_history_turns(&self) -> usize {
        self.model
            .as_ref()
            .and_then(|m| m.max_history_turns)
            .unwrap_or(20)
    }

    /// TTS section, or defaults.
    pub fn tts(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    pub fn mode_selection(&self) -> ModeSelection {
        self.pipeline.as_ref().map(|p| p.mode).unwrap_or_default()
    }

    pub fn terminators(&self) -> Vec<char> {
        self.pipeline
            .as_ref()
            .and_then(|p| p.terminators.as_deref())
            .unwrap_or(DEFAULT_TERMINATORS)
            .chars()
            .collect()
    }

    pub fn model_idle_timeout_secs(&self) -> u64 {
        self.pipeline
            .as_ref()
            .and_then(|p| p.model_idle_timeout_secs)
            .unwrap_or(60)
    }

    pub fn audio_mime_type(&self) -> String {
        self.pipeline
            .as_ref()
            .and_then(|p| p.audio_mime_type.clone())
            .unwrap_or_else(|| "audio/wav".to_string())
    }

    pub fn structured_prompt(&self) -> Option<&str> {
        self.pipeline
            .as_ref()
            .and_then(|p| p.structured_prompt.as_deref())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let model = self.model();
        if model.resolve_api_key().is_none() {
            warnings.push(format!(
                "Model provider '{}' has no API key configured",
                model.provider
            ));
        }
        if model.provider != "google" {
            errors.push(format!("Unknown model provider: {}", model.provider));
        }

        let tts = self.tts();
        if tts.ref_audio_path.is_none() {
            warnings.push("tts.ref_audio_path is not set; the backend default voice is used".into());
        }
        if tts.timeout_secs == 0 {
            errors.push("tts.timeout_secs must be at least 1".to_string());
        }
        if self.model_idle_timeout_secs() == 0 {
            errors.push("pipeline.model_idle_timeout_secs must be at least 1".to_string());
        }

        if self.gateway.as_ref().is_some_and(|g| g.port == 0) {
            errors.push("Gateway port cannot be 0".to_string());
        }

        if !self.ws_path().starts_with('/') {
            errors.push(format!("Gateway path must start with '/': {}", self.ws_path()));
        }

        let terminators = self.terminators();
        if terminators.is_empty() {
            errors.push("pipeline.terminators cannot be empty".to_string());
        } else if terminators.iter().any(|c| c.is_whitespace()) {
            errors.push("pipeline.terminators cannot contain whitespace".to_string());
        }

        (warnings, errors)
    }
}

/// Base directory for Parley data: `~/.parley/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, the variable name is unique to this test
        unsafe { std::env::set_var("TEST_PARLEY_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_PARLEY_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_PARLEY_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_PARLEY_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 8000);
        assert_eq!(config.gateway_bind(), "0.0.0.0");
        assert_eq!(config.ws_path(), "/ws/chat");
        assert_eq!(config.model_name(), "gemini-2.0-flash");
        assert_eq!(config.max_history_turns(), 20);
        assert_eq!(config.mode_selection(), ModeSelection::Auto);
        assert_eq!(config.terminators().len(), 10);
        assert_eq!(config.model_idle_timeout_secs(), 60);
    }

    #[test]
    fn test_tts_defaults_from_empty_section() {
        let config: Config = json5::from_str("{ tts: {} }").unwrap();
        let tts = config.tts.expect("tts should be present");
        assert_eq!(tts.base_url, "http://127.0.0.1:9880");
        assert_eq!(tts.top_k, 5);
        assert_eq!(tts.repetition_penalty, 1.35);
        assert_eq!(tts.text_split_method, "cut5");
        assert_eq!(tts.media_type, "wav");
        assert!(tts.parallel_infer);
        assert_eq!(tts.timeout_secs, 60);
    }

    #[test]
    fn test_model_resolve_api_key() {
        // SAFETY: test-only, the variable name is unique to this test
        unsafe { std::env::set_var("TEST_PARLEY_API_KEY", "from-env") };
        let model = ModelConfig {
            api_key_env: Some("TEST_PARLEY_API_KEY".into()),
            ..ModelConfig::default()
        };
        assert_eq!(model.resolve_api_key(), Some("from-env".into()));

        let direct = ModelConfig {
            api_key: Some("direct-key".into()),
            api_key_env: Some("TEST_PARLEY_API_KEY".into()),
            ..ModelConfig::default()
        };
        assert_eq!(direct.resolve_api_key(), Some("direct-key".into()));
        unsafe { std::env::remove_var("TEST_PARLEY_API_KEY") };
    }

    #[test]
    fn test_pipeline_mode_and_terminators() {
        let json_str = r#"{
            pipeline: {
                mode: "structured",
                terminators: "。！",
            }
        }"#;
        let config: Config = json5::from_str(json_str).unwrap();
        assert_eq!(config.mode_selection(), ModeSelection::Structured);
        assert_eq!(config.terminators(), vec!['。', '！']);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json5")).unwrap();
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_load_json5_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(
            &path,
            r#"{
                // comments are allowed
                gateway: { port: 9001 },
                tts: { ref_audio_path: "/voices/ref.wav", prompt_text: "参考文本" },
            }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9001);
        assert_eq!(config.tts().ref_audio_path().as_deref(), Some("/voices/ref.wav"));
        assert_eq!(config.tts().prompt_text, "参考文本");
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{ gateway: ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_validate_missing_api_key_warns() {
        let config = Config {
            model: Some(ModelConfig {
                api_key: None,
                api_key_env: None,
                ..ModelConfig::default()
            }),
            ..Config::default()
        };
        let (warnings, errors) = config.validate();
        assert!(
            warnings.iter().any(|w| w.contains("google") && w.contains("API key")),
            "Expected a warning about the missing API key, got: {warnings:?}"
        );
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_validate_bad_values_error() {
        let config = Config {
            gateway: Some(GatewayConfig {
                port: 0,
                bind: None,
                path: None,
                outbound_buffer: None,
                max_message_bytes: None,
            }),
            pipeline: Some(PipelineConfig {
                terminators: Some(String::new()),
                ..PipelineConfig::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("port")));
        assert!(errors.iter().any(|e| e.contains("terminators")));
    }

    #[test]
    fn test_validate_zero_timeouts_error() {
        let config: Config = json5::from_str(
            r#"{
                tts: { timeout_secs: 0 },
                pipeline: { model_idle_timeout_secs: 0 },
            }"#,
        )
        .unwrap();
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("tts.timeout_secs")));
        assert!(errors.iter().any(|e| e.contains("model_idle_timeout_secs")));

        let (_warnings, errors) = Config::default().validate();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }
}
