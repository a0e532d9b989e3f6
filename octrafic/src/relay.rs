//! Streaming relay: one cancellable model call as an ordered event queue.
//!
//! The relay runs the model call on a background task and forwards typed
//! [`RelayEvent`]s through a bounded channel. The controller is the only
//! consumer. Cancelling the token stops forwarding and yields a single
//! [`RelayEvent::Cancelled`]; the in-flight request is dropped and left to
//! finish (or fail) on its own.

use crate::error::LlmError;
use crate::llm::{ChatRequest, SharedModel, StreamChunk, Usage};
use crate::turn::ToolCall;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default capacity of the relay queue.
pub const DEFAULT_RELAY_CAPACITY: usize = 64;

/// Event emitted by the relay, in production order.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Visible text chunk.
    Text(String),
    /// Reasoning text chunk.
    Reasoning(String),
    /// The batch of tool calls of this response. Emitted at most once,
    /// after every text chunk and right before [`Done`](Self::Done).
    ToolCalls(Vec<ToolCall>),
    /// Token counters.
    Usage(Usage),
    /// The model finished normally.
    Done,
    /// The call failed; terminal.
    Error(LlmError),
    /// The call was cancelled; terminal.
    Cancelled,
}

impl RelayEvent {
    /// Returns `true` for events after which nothing else is delivered.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_) | Self::Cancelled)
    }
}

/// Receiving side of a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    events: mpsc::Receiver<RelayEvent>,
    ended: bool,
}

impl RelayHandle {
    /// Next event. `None` after the terminal event, or if the relay task
    /// exited without one.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        if self.ended {
            return None;
        }
        let event = self.events.recv().await;
        self.ended = event.as_ref().is_none_or(RelayEvent::is_terminal);
        if self.ended {
            self.events.close();
        }
        event
    }
}

/// Spawns relay tasks for a model.
#[derive(Clone)]
pub struct StreamingRelay {
    model: SharedModel,
    capacity: usize,
}

impl std::fmt::Debug for StreamingRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingRelay")
            .field("model", &self.model.name())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl StreamingRelay {
    /// Create a relay with the default queue capacity.
    #[must_use]
    pub fn new(model: SharedModel) -> Self {
        Self {
            model,
            capacity: DEFAULT_RELAY_CAPACITY,
        }
    }

    /// Set the queue capacity (minimum 1).
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Start streaming `request` on a background task.
    #[must_use]
    pub fn start(&self, request: ChatRequest, cancel: CancellationToken) -> RelayHandle {
        let (tx, rx) = mpsc::channel(self.capacity);
        let model = SharedModel::clone(&self.model);
        tokio::spawn(run_relay(model, request, cancel, tx));
        RelayHandle {
            events: rx,
            ended: false,
        }
    }
}

async fn run_relay(
    model: SharedModel,
    request: ChatRequest,
    cancel: CancellationToken,
    tx: mpsc::Sender<RelayEvent>,
) {
    let terminal = tokio::select! {
        biased;
        () = cancel.cancelled() => RelayEvent::Cancelled,
        outcome = pump(&model, request, &tx) => outcome,
    };
    // A cancel that lands after the stream ended still reports as cancelled.
    let terminal = if cancel.is_cancelled() {
        RelayEvent::Cancelled
    } else {
        terminal
    };
    trace!(event = ?terminal, "relay finished");
    let _ = tx.send(terminal).await;
}

/// Drives the model stream, forwarding events until it ends.
/// Returns the terminal event.
async fn pump(model: &SharedModel, request: ChatRequest, tx: &mpsc::Sender<RelayEvent>) -> RelayEvent {
    let mut stream = match model.stream(request).await {
        Ok(stream) => stream,
        Err(e) => return RelayEvent::Error(e),
    };

    let mut calls: Vec<ToolCall> = Vec::new();
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(StreamChunk::Text(text)) => RelayEvent::Text(text),
            Ok(StreamChunk::Reasoning(text)) => RelayEvent::Reasoning(text),
            Ok(StreamChunk::Usage(usage)) => RelayEvent::Usage(usage),
            Ok(StreamChunk::ToolCalls(batch)) => {
                calls.extend(batch);
                continue;
            }
            Err(e) => return RelayEvent::Error(e),
        };
        trace!(event = ?event, "relay event");
        if tx.send(event).await.is_err() {
            debug!("relay consumer dropped");
            return RelayEvent::Cancelled;
        }
    }

    if !calls.is_empty() && tx.send(RelayEvent::ToolCalls(calls)).await.is_err() {
        return RelayEvent::Cancelled;
    }
    RelayEvent::Done
}
