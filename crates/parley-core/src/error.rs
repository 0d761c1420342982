use thiserror::Error;

/// Error taxonomy shared across the relay.
///
/// Synthesis and structured-parse failures are recovered where they happen;
/// they exist here so that logs and metrics can name them consistently.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Model stream error: {0}")]
    ModelStream(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Structured reply parse error: {0}")]
    StructuredParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// Short label used for `errors_total{kind}` and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Transport(_) => "transport",
            Self::ModelStream(_) => "model_stream",
            Self::Synthesis(_) => "synthesis",
            Self::StructuredParse(_) => "structured_parse",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
