//! Per-connection chat session holding the conversation history.

use std::sync::Arc;

use tracing::debug;

use parley_core::config::Config;
use parley_core::types::{ChatEntry, ContentBlock, Role, UserInput};

use crate::{CompletionRequest, Credentials, LlmProvider, TokenStream};

/// Stands in for a spoken turn's audio once a newer turn is recorded.
pub const AUDIO_PLACEHOLDER: &str = "[voice message]";

/// Fixed parameters of a chat session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: String,
    pub system_instruction: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// User/model exchanges kept; older ones are dropped first.
    pub max_history_turns: usize,
}

impl SessionSettings {
    /// Settings from config with the given system instruction.
    pub fn from_config(config: &Config, system_instruction: String) -> Self {
        let model = config.model();
        Self {
            model: config.model_name(),
            system_instruction: Some(system_instruction),
            max_tokens: model.max_tokens,
            temperature: model.temperature,
            max_history_turns: config.max_history_turns(),
        }
    }
}

/// A conversation with the model, owned by exactly one connection.
///
/// Requests are built from the history plus the new input; the history only
/// changes when a completed turn is recorded.
pub struct ChatSession {
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    settings: SessionSettings,
    history: Vec<ChatEntry>,
}

impl ChatSession {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        settings: SessionSettings,
    ) -> Self {
        Self {
            provider,
            credentials,
            settings,
            history: Vec::new(),
        }
    }

    fn request_for(&self, input: &UserInput) -> CompletionRequest {
        let mut messages = self.history.clone();
        messages.push(ChatEntry::user(input));
        CompletionRequest {
            model: self.settings.model.clone(),
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            system: self.settings.system_instruction.clone(),
        }
    }

    /// Start a streamed reply to `input`.
    pub async fn stream_reply(&self, input: &UserInput) -> anyhow::Result<TokenStream> {
        let request = self.request_for(input);
        self.provider.stream(&request, &self.credentials).await
    }

    /// Fetch the complete reply to `input` in one call.
    pub async fn complete_reply(&self, input: &UserInput) -> anyhow::Result<String> {
        let request = self.request_for(input);
        self.provider.complete(&request, &self.credentials).await
    }

    /// Append a finished exchange and trim the oldest ones past the limit.
    ///
    /// Only the newest exchange keeps inline audio; clips recorded earlier
    /// are replaced by [`AUDIO_PLACEHOLDER`].
    pub fn record_turn(&mut self, input: &UserInput, reply: &str) {
        let mut released = 0;
        for block in self.history.iter_mut().flat_map(|e| e.content.iter_mut()) {
            if let ContentBlock::InlineData { data, .. } = block {
                released += data.len();
                *block = ContentBlock::Text {
                    text: AUDIO_PLACEHOLDER.to_string(),
                };
            }
        }
        if released > 0 {
            debug!(bytes = released, "Dropped earlier audio from chat history");
        }

        self.history.push(ChatEntry::user(input));
        self.history.push(ChatEntry::model(reply));

        let max_entries = self.settings.max_history_turns * 2;
        if self.history.len() > max_entries {
            let excess = self.history.len() - max_entries;
            self.history.drain(..excess);
            // Keep the history starting on a user entry
            while self.history.first().is_some_and(|e| e.role != Role::User) {
                self.history.remove(0);
            }
            debug!(dropped = excess, kept = self.history.len(), "Trimmed chat history");
        }
    }

    pub fn history(&self) -> &[ChatEntry] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::CompletionChunk;

    /// Records every request and answers with a fixed reply.
    struct RecordingProvider {
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn id(&self) -> &str {
            "recording"
        }

        async fn stream(
            &self,
            request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<TokenStream> {
            self.requests.lock().unwrap().push(request.clone());
            let chunk = CompletionChunk {
                delta: Some("ok".into()),
                ..CompletionChunk::default()
            };
            Ok(Box::pin(futures::stream::iter(vec![Ok(chunk)])))
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            Ok("ok".into())
        }
    }

    fn session(max_history_turns: usize) -> (ChatSession, Arc<RecordingProvider>) {
        let provider = Arc::new(RecordingProvider {
            requests: Mutex::new(Vec::new()),
        });
        let settings = SessionSettings {
            model: "test-model".into(),
            system_instruction: Some("persona".into()),
            max_tokens: None,
            temperature: None,
            max_history_turns,
        };
        (
            ChatSession::new(provider.clone(), Credentials::None, settings),
            provider,
        )
    }

    #[tokio::test]
    async fn test_request_includes_history_and_system() {
        let (mut session, provider) = session(10);
        session.record_turn(&UserInput::Text("first".into()), "reply one");

        session
            .complete_reply(&UserInput::Text("second".into()))
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.model, "test-model");
        assert_eq!(request.system.as_deref(), Some("persona"));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2], ChatEntry::user(&UserInput::Text("second".into())));
    }

    #[tokio::test]
    async fn test_replying_does_not_mutate_history() {
        let (session, _provider) = session(10);
        let _stream = session
            .stream_reply(&UserInput::Text("hi".into()))
            .await
            .unwrap();
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_history_trimmed_to_limit() {
        let (mut session, _provider) = session(2);
        for i in 0..5 {
            session.record_turn(&UserInput::Text(format!("q{i}")), &format!("a{i}"));
        }
        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], ChatEntry::user(&UserInput::Text("q3".into())));
        assert_eq!(history[3], ChatEntry::model("a4"));
    }

    #[test]
    fn test_only_latest_audio_kept_inline() {
        let (mut session, _provider) = session(10);
        let spoken = |byte: u8| UserInput::Audio {
            mime_type: "audio/wav".into(),
            data: vec![byte; 1024],
            prompt: None,
        };

        session.record_turn(&spoken(1), "a0");
        session.record_turn(&spoken(2), "a1");

        let history = session.history();
        assert_eq!(
            history[0].content,
            vec![ContentBlock::Text {
                text: AUDIO_PLACEHOLDER.into()
            }]
        );
        assert_eq!(history[2], ChatEntry::user(&spoken(2)));

        session.record_turn(&UserInput::Text("q".into()), "a2");
        let inline = session
            .history()
            .iter()
            .flat_map(|e| &e.content)
            .filter(|b| matches!(b, ContentBlock::InlineData { .. }))
            .count();
        assert_eq!(inline, 0);
    }
}
