//! One WebSocket generation session: read the request, check out a
//! replica, stream updates, close.

use std::borrow::Cow;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use lumen_core::{GenerationRequest, LumenError, Result, StepUpdate};
use lumen_runtime::{resolve, DenoiseLoop};
use lumen_transport::{encode, Frame, UpdateSink, WireFormat};

use crate::api::AppState;

/// Close-frame reasons are capped at 123 bytes by the protocol.
const MAX_CLOSE_REASON: usize = 123;

/// Writes each update as one WebSocket message and flushes it.
pub struct WsSink<S> {
    sink: S,
    format: WireFormat,
}

impl<S> WsSink<S> {
    pub fn new(sink: S, format: WireFormat) -> Self {
        Self { sink, format }
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[async_trait]
impl<S> UpdateSink for WsSink<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    async fn send(&mut self, update: StepUpdate) -> Result<()> {
        let message = match encode(&update, self.format)? {
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Text(text) => Message::Text(text),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| LumenError::Transport(e.to_string()))
    }
}

/// Entry point for an upgraded connection.
pub async fn run(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    let (tx, rx) = socket.split();
    serve(tx, rx, state)
        .instrument(info_span!("session", %session_id))
        .await
}

async fn serve<Tx, Rx>(mut tx: Tx, mut rx: Rx, state: Arc<AppState>)
where
    Tx: Sink<Message> + Unpin + Send,
    Tx::Error: Display,
    Rx: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin + Send,
{
    let started = Instant::now();
    let request = match read_request(&mut rx, state.session.request_timeout).await {
        Ok(request) => request,
        Err(e) => return finish(&mut tx, Err(e)).await,
    };
    let params = match resolve(&request, &state.model, &state.session.limits) {
        Ok(params) => params,
        Err(e) => return finish(&mut tx, Err(e)).await,
    };
    info!(
        steps = params.steps,
        width = params.width,
        height = params.height,
        samples = params.samples,
        binary = params.use_binary,
        "session accepted"
    );

    let deadline = started + state.session.session_timeout;
    let acquired = tokio::time::timeout_at(deadline.into(), state.pool.acquire()).await;
    let mut pipeline = match acquired {
        Ok(Ok(pipeline)) => pipeline,
        Ok(Err(e)) => return finish(&mut tx, Err(e)).await,
        Err(_) => {
            let e = LumenError::Cancelled("timed out waiting for a free pipeline".into());
            return finish(&mut tx, Err(e)).await;
        }
    };
    debug!(queued_ms = started.elapsed().as_millis() as u64, "pipeline acquired");

    let mut options = state.session.loop_options();
    options.deadline = Some(deadline);
    options.cancel = Some(state.shutdown.clone());

    let mut sink = WsSink::new(tx, WireFormat::from_use_binary(params.use_binary));
    let result = DenoiseLoop::new(&mut pipeline, options)
        .run(&params, &mut sink)
        .await;
    drop(pipeline);

    let mut tx = sink.into_inner();
    let result = result.map(|report| {
        info!(
            executed_steps = report.executed_steps,
            emitted = report.emitted,
            decoded = report.decoded,
            seed = report.seed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session complete"
        );
    });
    finish(&mut tx, result).await;
}

/// Wait for the client's single JSON request, ignoring keepalives.
async fn read_request<Rx>(rx: &mut Rx, wait: Duration) -> Result<GenerationRequest>
where
    Rx: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let message = match tokio::time::timeout_at(deadline, rx.next()).await {
            Err(_) => {
                return Err(LumenError::InvalidRequest(format!(
                    "no request received within {}s",
                    wait.as_secs()
                )))
            }
            Ok(None) => return Err(LumenError::Transport("client went away".into())),
            Ok(Some(Err(e))) => return Err(LumenError::Transport(e.to_string())),
            Ok(Some(Ok(message))) => message,
        };
        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text)
                    .map_err(|e| LumenError::InvalidRequest(format!("malformed request: {e}")))
            }
            Message::Binary(_) => {
                return Err(LumenError::InvalidRequest(
                    "request must be a JSON text message".into(),
                ))
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                return Err(LumenError::Transport("client closed before sending a request".into()))
            }
        }
    }
}

/// Close the connection with a code matching the outcome. A failed write
/// means the peer is gone, so no close frame is attempted.
async fn finish<Tx>(tx: &mut Tx, result: Result<()>)
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let (code, reason) = match &result {
        Ok(()) => (close_code::NORMAL, String::new()),
        Err(LumenError::Transport(msg)) => {
            debug!("client disconnected: {msg}");
            return;
        }
        Err(e @ LumenError::InvalidRequest(_)) => {
            info!("rejected request: {e}");
            (close_code::POLICY, e.to_string())
        }
        Err(e) => {
            warn!("session failed: {e}");
            (close_code::ERROR, e.to_string())
        }
    };
    let frame = CloseFrame {
        code,
        reason: Cow::Owned(truncate_reason(&reason).to_string()),
    };
    if let Err(e) = tx.send(Message::Close(Some(frame))).await {
        debug!("close frame not delivered: {e}");
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
