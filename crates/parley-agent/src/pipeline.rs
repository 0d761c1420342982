//! Per-turn reply pipeline.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use parley_core::config::{Config, ModeSelection};
use parley_core::error::ParleyError;
use parley_core::protocol::{InboundTurn, OutboundMessage, TurnStatus};
use parley_core::types::UserInput;
use parley_providers::ChatSession;
use parley_tts::{SynthesisGateway, SynthesisOutcome};

use crate::PipelineError;
use crate::segmenter::SentenceSegmenter;
use crate::structured::parse_structured_reply;

/// How a turn's reply is obtained and emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Caption each streamed fragment, speak each completed sentence.
    Streaming,
    /// Fetch one JSON reply with transcription and response.
    Structured,
}

impl ReplyMode {
    /// Pick the mode for a turn. Spoken turns are always structured.
    pub fn select(selection: ModeSelection, turn: &InboundTurn) -> Self {
        match (selection, turn) {
            (_, InboundTurn::Audio(_)) => Self::Structured,
            (ModeSelection::Structured, InboundTurn::Text(_)) => Self::Structured,
            (ModeSelection::Auto | ModeSelection::Streaming, InboundTurn::Text(_)) => {
                Self::Streaming
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Structured => "structured",
        }
    }
}

/// What one completed turn produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSummary {
    /// The model's reply text as received.
    pub reply: String,
    /// Units handed to the synthesis gateway.
    pub units: usize,
    pub audio_messages: usize,
    pub synthesis_failures: usize,
    /// What the model heard in a spoken turn, when it said.
    pub transcription: Option<String>,
}

impl TurnSummary {
    pub fn reply_chars(&self) -> usize {
        self.reply.chars().count()
    }
}

/// Runs reply turns against a synthesis gateway. One per connection.
#[derive(Clone)]
pub struct ReplyPipeline {
    synthesizer: SynthesisGateway,
    terminators: Vec<char>,
    idle_timeout: Duration,
}

impl ReplyPipeline {
    pub fn new(synthesizer: SynthesisGateway, terminators: Vec<char>, idle_timeout: Duration) -> Self {
        Self {
            synthesizer,
            terminators,
            idle_timeout,
        }
    }

    pub fn from_config(config: &Config, synthesizer: SynthesisGateway) -> Self {
        Self::new(
            synthesizer,
            config.terminators(),
            Duration::from_secs(config.model_idle_timeout_secs()),
        )
    }

    /// Run one turn and record it in the session history on success.
    ///
    /// Every message goes to `out` in emission order, ending with a done
    /// status. On error nothing more is sent and the history is unchanged.
    pub async fn run(
        &self,
        mode: ReplyMode,
        session: &mut ChatSession,
        input: UserInput,
        out: &mpsc::Sender<OutboundMessage>,
    ) -> Result<TurnSummary, PipelineError> {
        let summary = match mode {
            ReplyMode::Streaming => self.run_streaming(session, &input, out).await?,
            ReplyMode::Structured => self.run_structured(session, &input, out).await?,
        };
        // A transcribed spoken turn is kept as its text, not its audio
        let recorded = match &summary.transcription {
            Some(heard) if input.is_audio() => UserInput::Text(heard.clone()),
            _ => input,
        };
        session.record_turn(&recorded, &summary.reply);
        Ok(summary)
    }

    /// Caption fragments as they stream in and speak each completed unit.
    pub async fn run_streaming(
        &self,
        session: &ChatSession,
        input: &UserInput,
        out: &mpsc::Sender<OutboundMessage>,
    ) -> Result<TurnSummary, PipelineError> {
        let mut stream = tokio::time::timeout(self.idle_timeout, session.stream_reply(input))
            .await
            .map_err(|_| PipelineError::ModelTimeout(self.idle_timeout))?
            .map_err(PipelineError::ModelStream)?;
        let mut segmenter = SentenceSegmenter::new(self.terminators.iter().copied());
        let mut summary = TurnSummary::default();

        loop {
            let next = tokio::time::timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| PipelineError::ModelTimeout(self.idle_timeout))?;

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(PipelineError::ModelStream(e)),
                None => break,
            };

            let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) else {
                continue;
            };

            summary.reply.push_str(&delta);
            send(out, OutboundMessage::Caption(delta.clone())).await?;

            for unit in segmenter.feed(&delta) {
                self.speak(&unit, out, &mut summary).await?;
            }
        }

        if let Some(rest) = segmenter.flush() {
            self.speak(&rest, out, &mut summary).await?;
        }

        send(out, OutboundMessage::Status(TurnStatus::Done)).await?;
        Ok(summary)
    }

    /// Fetch the whole reply, then emit transcription, caption and audio.
    ///
    /// A reply that is not the expected JSON is used verbatim as the response.
    pub async fn run_structured(
        &self,
        session: &ChatSession,
        input: &UserInput,
        out: &mpsc::Sender<OutboundMessage>,
    ) -> Result<TurnSummary, PipelineError> {
        let raw = tokio::time::timeout(self.idle_timeout, session.complete_reply(input))
            .await
            .map_err(|_| PipelineError::ModelTimeout(self.idle_timeout))?
            .map_err(PipelineError::ModelStream)?;

        let mut summary = TurnSummary::default();

        let response = match parse_structured_reply(&raw) {
            Ok(reply) => {
                if !reply.user_transcription.is_empty() {
                    summary.transcription = Some(reply.user_transcription.clone());
                    send(out, OutboundMessage::Transcription(reply.user_transcription)).await?;
                }
                reply.assistant_response
            }
            Err(e) => {
                let err = ParleyError::from(e);
                warn!(kind = err.kind(), error = %err, reply_len = raw.len(), "Structured reply unparsable, using raw text");
                raw.clone()
            }
        };

        if !response.is_empty() {
            send(out, OutboundMessage::Caption(response.clone())).await?;
            self.speak(&response, out, &mut summary).await?;
        }

        summary.reply = raw;
        send(out, OutboundMessage::Status(TurnStatus::Done)).await?;
        Ok(summary)
    }

    async fn speak(
        &self,
        unit: &str,
        out: &mpsc::Sender<OutboundMessage>,
        summary: &mut TurnSummary,
    ) -> Result<(), PipelineError> {
        summary.units += 1;
        debug!(unit, "Synthesizing unit");

        match self.synthesizer.synthesize_detailed(unit).await {
            SynthesisOutcome::Audio(bytes) => {
                summary.audio_messages += 1;
                send(out, OutboundMessage::Audio(bytes)).await
            }
            SynthesisOutcome::Failed => {
                summary.synthesis_failures += 1;
                Ok(())
            }
            SynthesisOutcome::Unspeakable => Ok(()),
        }
    }
}

async fn send(out: &mpsc::Sender<OutboundMessage>, message: OutboundMessage) -> Result<(), PipelineError> {
    out.send(message).await.map_err(|_| PipelineError::Closed)
}
