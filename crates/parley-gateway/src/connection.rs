//! Session endpoint: one websocket, one chat session, one turn at a time.
//!
//! A reader task turns frames into queued turns and a writer task turns
//! outbound messages into frames. The turn loop in between runs each turn's
//! pipeline to completion before taking the next one. Closing the socket
//! cancels all three.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_agent::prompt::structured_prompt;
use parley_agent::{PipelineError, ReplyMode, ReplyPipeline};
use parley_core::error::ParleyError;
use parley_core::protocol::{InboundTurn, OutboundMessage, TurnStatus, WireFrame};
use parley_core::types::UserInput;
use parley_providers::ChatSession;

use crate::state::GatewayState;

/// Turns received while one is in flight wait here.
const TURN_QUEUE: usize = 16;

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New WebSocket connection");

    state.register_connection(&conn_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    let (ws_tx, ws_rx) = ws.split();
    let cancel = CancellationToken::new();
    let (out_tx, out_rx) = mpsc::channel::<OutboundMessage>(state.config.outbound_buffer());
    let (turn_tx, turn_rx) = mpsc::channel::<InboundTurn>(TURN_QUEUE);

    let writer = tokio::spawn(write_loop(ws_tx, out_rx, cancel.clone(), conn_id.clone()));
    let reader = tokio::spawn(read_loop(ws_rx, turn_tx, cancel.clone(), conn_id.clone()));

    run_turns(&state, &conn_id, turn_rx, out_tx, &cancel).await;

    cancel.cancel();
    reader.abort();
    let _ = writer.await;

    state.remove_connection(&conn_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Map a websocket frame to a user turn. Control frames yield `None`.
pub fn parse_frame(message: Message) -> Option<InboundTurn> {
    match message {
        Message::Text(text) => Some(InboundTurn::Text(text.to_string())),
        Message::Binary(data) => Some(InboundTurn::Audio(data.to_vec())),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

/// Encode an outbound message as a websocket frame.
pub fn to_ws_message(message: OutboundMessage) -> Result<Message, serde_json::Error> {
    Ok(match message.into_wire()? {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Binary(bytes) => Message::Binary(bytes.into()),
    })
}

/// Reads frames until close. A turn arriving while the queue is full is
/// dropped so that a close frame behind it is still seen.
async fn read_loop<S>(
    mut ws_rx: S,
    turn_tx: mpsc::Sender<InboundTurn>,
    cancel: CancellationToken,
    conn_id: String,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Ok(msg) => {
                let Some(turn) = parse_frame(msg) else {
                    continue;
                };
                match turn_tx.try_send(turn) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(conn_id = %conn_id, queued = TURN_QUEUE, "Turn queue full, dropping turn");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
        }
    }
    cancel.cancel();
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<OutboundMessage>,
    cancel: CancellationToken,
    conn_id: String,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = out_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let ends_turn = message.is_terminal();
        let frame = match to_ws_message(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn_id = %conn_id, %e, "Failed to encode outbound message");
                continue;
            }
        };

        if let Err(e) = ws_tx.send(frame).await {
            debug!(conn_id = %conn_id, %e, "WebSocket send failed");
            cancel.cancel();
            break;
        }
        if ends_turn {
            debug!(conn_id = %conn_id, "Turn flushed to client");
        }
    }
    let _ = ws_tx.close().await;
}

/// Process queued turns one at a time until the queue closes or the
/// connection is cancelled.
pub async fn run_turns(
    state: &GatewayState,
    conn_id: &str,
    mut turn_rx: mpsc::Receiver<InboundTurn>,
    out: mpsc::Sender<OutboundMessage>,
    cancel: &CancellationToken,
) {
    let mut session = state.new_session();
    let pipeline = state.pipeline();

    loop {
        let turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            turn = turn_rx.recv() => match turn {
                Some(turn) => turn,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(conn_id, "Connection closed mid-turn");
                break;
            }
            result = process_turn(state, conn_id, &mut session, &pipeline, turn, &out) => result,
        };

        if let Err(e) = result {
            debug!(conn_id, %e, "Ending session");
            break;
        }
    }
}

/// Run one turn. Only an unusable outbound channel is returned as an error.
async fn process_turn(
    state: &GatewayState,
    conn_id: &str,
    session: &mut ChatSession,
    pipeline: &ReplyPipeline,
    turn: InboundTurn,
    out: &mpsc::Sender<OutboundMessage>,
) -> Result<(), PipelineError> {
    let mode = ReplyMode::select(state.config.mode_selection(), &turn);

    let input = match turn {
        InboundTurn::Text(text) if text.trim().is_empty() => {
            debug!(conn_id, "Empty text turn");
            return out
                .send(OutboundMessage::Status(TurnStatus::Done))
                .await
                .map_err(|_| PipelineError::Closed);
        }
        InboundTurn::Text(text) => UserInput::Text(text),
        InboundTurn::Audio(data) => UserInput::Audio {
            mime_type: state.config.audio_mime_type(),
            data,
            prompt: Some(structured_prompt(&state.config)),
        },
    };

    info!(conn_id, mode = mode.as_str(), input_len = input.size(), "Turn started");
    let started = Instant::now();

    match pipeline.run(mode, session, input, out).await {
        Ok(summary) => {
            let elapsed = started.elapsed();
            info!(
                conn_id,
                mode = mode.as_str(),
                units = summary.units,
                audio = summary.audio_messages,
                reply_chars = summary.reply_chars(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Turn complete"
            );
            #[cfg(feature = "metrics")]
            {
                crate::metrics::record_turn(mode.as_str(), elapsed.as_secs_f64());
                crate::metrics::record_synthesis_failures(summary.synthesis_failures);
            }
            Ok(())
        }
        Err(e) if e.is_recoverable() => {
            error!(conn_id, mode = mode.as_str(), error = %e, "Turn failed");
            let kind = ParleyError::from(e).kind();
            #[cfg(feature = "metrics")]
            crate::metrics::record_error(kind);
            debug!(conn_id, kind, "Sending error status");
            out.send(OutboundMessage::Status(TurnStatus::Error))
                .await
                .map_err(|_| PipelineError::Closed)
        }
        Err(e) => Err(e),
    }
}
