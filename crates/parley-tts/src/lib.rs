//! Speech synthesis for reply units.
//!
//! [`SynthesisGateway`] sits between the reply pipeline and a
//! [`SpeechBackend`]. It skips text with nothing to pronounce and turns every
//! backend failure into "no audio" for that unit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_core::error::ParleyError;

pub mod sovits;

pub use sovits::SovitsBackend;

/// A text-to-speech backend.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Backend identifier for logs.
    fn id(&self) -> &str;

    /// Synthesize `text` and return the encoded audio.
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>>;

    /// Point the backend at the configured voice weights.
    async fn select_weights(&self) -> anyhow::Result<()>;
}

/// Whether `text` has anything a voice could pronounce.
///
/// Letters and digits of any script count, as do CJK unified ideographs.
pub fn is_speakable(text: &str) -> bool {
    text.chars()
        .any(|c| c.is_alphanumeric() || ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// What happened to one synthesis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Audio(Vec<u8>),
    /// Filtered out before reaching the backend.
    Unspeakable,
    /// The backend call failed; already logged.
    Failed,
}

impl SynthesisOutcome {
    pub fn into_audio(self) -> Option<Vec<u8>> {
        match self {
            Self::Audio(bytes) => Some(bytes),
            Self::Unspeakable | Self::Failed => None,
        }
    }
}

/// Shared front for a speech backend. Cheap to clone.
#[derive(Clone)]
pub struct SynthesisGateway {
    backend: Arc<dyn SpeechBackend>,
}

impl SynthesisGateway {
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        Self { backend }
    }

    /// Audio for `text`, or `None` when there is none to send.
    pub async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        self.synthesize_detailed(text).await.into_audio()
    }

    /// Like [`synthesize`](Self::synthesize) but tells a filtered unit apart
    /// from a failed one.
    pub async fn synthesize_detailed(&self, text: &str) -> SynthesisOutcome {
        if !is_speakable(text) {
            debug!(text, "Skipping unspeakable unit");
            return SynthesisOutcome::Unspeakable;
        }

        let backend = Arc::clone(&self.backend);
        let owned = text.to_string();
        let handle = tokio::spawn(async move { backend.synthesize(&owned).await });

        match handle.await {
            Ok(Ok(audio)) => {
                debug!(text_len = text.len(), bytes = audio.len(), "Unit synthesized");
                SynthesisOutcome::Audio(audio)
            }
            Ok(Err(e)) => self.failed(text, ParleyError::Synthesis(format!("{e:#}"))),
            Err(e) => self.failed(text, ParleyError::Synthesis(format!("task aborted: {e}"))),
        }
    }

    fn failed(&self, text: &str, err: ParleyError) -> SynthesisOutcome {
        warn!(backend = self.backend.id(), text, kind = err.kind(), error = %err, "Synthesis failed");
        SynthesisOutcome::Failed
    }

    /// Run weight selection in the background; failures are only logged.
    pub fn spawn_weight_selection(&self) -> tokio::task::JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            match backend.select_weights().await {
                Ok(()) => debug!(backend = backend.id(), "Voice weights selected"),
                Err(e) => warn!(backend = backend.id(), error = %e, "Voice weight selection failed"),
            }
        })
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }
}
