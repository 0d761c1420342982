//! Reply pipeline: turns a model reply into ordered captions and audio.
//!
//! The pipeline takes one user turn, asks the [`ChatSession`] for a reply,
//! cuts the reply into sentence units with a [`SentenceSegmenter`], has each
//! unit synthesized, and sends [`OutboundMessage`]s in order on a channel
//! that the session endpoint drains into the transport.
//!
//! [`ChatSession`]: parley_providers::ChatSession
//! [`OutboundMessage`]: parley_core::protocol::OutboundMessage

use std::time::Duration;

use thiserror::Error;

use parley_core::error::ParleyError;

pub mod pipeline;
pub mod prompt;
pub mod segmenter;
pub mod structured;

pub use pipeline::{ReplyMode, ReplyPipeline, TurnSummary};
pub use segmenter::{SentenceSegmenter, Units};
pub use structured::{StructuredParseError, StructuredReply, parse_structured_reply};

/// Why a turn ended without its final status.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model call failed: {0:#}")]
    ModelStream(anyhow::Error),

    #[error("no model output within {0:?}")]
    ModelTimeout(Duration),

    /// The receiving side of the outbound channel is gone.
    #[error("outbound channel closed")]
    Closed,
}

impl PipelineError {
    /// Whether the transport is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl From<PipelineError> for ParleyError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::ModelStream(_) | PipelineError::ModelTimeout(_) => {
                ParleyError::ModelStream(e.to_string())
            }
            PipelineError::Closed => ParleyError::Transport(e.to_string()),
        }
    }
}
