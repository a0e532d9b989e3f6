//! Scripted fakes of the collaborator traits, shared by the unit tests.

#![allow(clippy::unwrap_used)]

use crate::collab::{HttpOutcome, TestExecutor, TestSpec};
use crate::confirmation::{ConfirmationHandler, ConfirmationRequest, Decision};
use crate::conversation::{Conversation, ConversationStore, MessageRecord, StoredMessage};
use crate::error::{LlmError, StoreError, StoreResult, ToolError};
use crate::llm::{ChatModel, ChatRequest, ChunkStream, StreamChunk, Usage};
use crate::session::{PlanSelector, SessionObserver, SessionState};
use crate::transcript::TranscriptLine;
use crate::turn::ToolCall;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

enum Step {
    Chunks(Vec<Result<StreamChunk, LlmError>>),
    Fail(LlmError),
}

/// A [`ChatModel`] that replays scripted responses, one per call.
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ChatRequest>>,
    chunk_delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            chunk_delay: None,
        }
    }

    fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    /// Text chunks followed by usage.
    pub fn then_text<'a>(self, chunks: impl IntoIterator<Item = &'a str>) -> Self {
        let mut items: Vec<Result<StreamChunk, LlmError>> = chunks
            .into_iter()
            .map(|c| Ok(StreamChunk::Text(c.to_string())))
            .collect();
        items.push(Ok(StreamChunk::Usage(Usage::new(10, 2))));
        self.then(Step::Chunks(items))
    }

    /// Optional text, one tool call, usage.
    pub fn then_tool_call(self, text: &str, call: ToolCall) -> Self {
        self.then_tool_calls(text, vec![call])
    }

    /// Optional text, a batch of tool calls, usage.
    pub fn then_tool_calls(self, text: &str, calls: Vec<ToolCall>) -> Self {
        let mut items = Vec::new();
        if !text.is_empty() {
            items.push(Ok(StreamChunk::Text(text.to_string())));
        }
        items.push(Ok(StreamChunk::ToolCalls(calls)));
        items.push(Ok(StreamChunk::Usage(Usage::new(10, 2))));
        self.then(Step::Chunks(items))
    }

    /// The call itself fails.
    pub fn then_error(self, message: &str) -> Self {
        self.then(Step::Fail(LlmError::stream(message)))
    }

    /// Some text, then the stream breaks.
    pub fn then_broken_stream(self, text: &str, message: &str) -> Self {
        self.then(Step::Chunks(vec![
            Ok(StreamChunk::Text(text.to_string())),
            Err(LlmError::stream(message)),
        ]))
    }

    /// Sleep before every chunk.
    pub const fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, LlmError> {
        self.requests.lock().unwrap().push(request);
        let step = self.steps.lock().unwrap().pop_front();
        let items = match step {
            Some(Step::Chunks(items)) => items,
            Some(Step::Fail(e)) => return Err(e),
            None => return Err(LlmError::stream("script exhausted")),
        };
        let delay = self.chunk_delay;
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(stream))
    }
}

/// A [`TestExecutor`] that answers from a table and records every request.
pub struct RecordingExecutor {
    answers: HashMap<String, Result<u16, String>>,
    delay: Option<Duration>,
    executed: Mutex<Vec<TestSpec>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingExecutor {
    /// Every path answers 200 unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            delay: None,
            executed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn respond(mut self, path: &str, status: u16) -> Self {
        self.answers.insert(path.to_string(), Ok(status));
        self
    }

    pub fn fail(mut self, path: &str, message: &str) -> Self {
        self.answers.insert(path.to_string(), Err(message.to_string()));
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn executed(&self) -> Vec<TestSpec> {
        self.executed.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestExecutor for RecordingExecutor {
    async fn execute(&self, test: &TestSpec) -> Result<HttpOutcome, ToolError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.executed.lock().unwrap().push(test.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.answers.get(&test.endpoint) {
            Some(Err(message)) => Err(ToolError::execution(message.clone())),
            Some(Ok(status)) => Ok(HttpOutcome {
                status_code: *status,
                body: format!(r#"{{"status":{status}}}"#),
                duration: Duration::from_millis(3),
            }),
            None => Ok(HttpOutcome {
                status_code: 200,
                body: r#"{"ok":true}"#.to_string(),
                duration: Duration::from_millis(3),
            }),
        }
    }
}

/// Answers confirmations from a script; approves once it runs out.
pub struct ScriptedConfirmations {
    decisions: Mutex<VecDeque<Decision>>,
    asked: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedConfirmations {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<ConfirmationRequest> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationHandler for ScriptedConfirmations {
    async fn confirm(&self, request: &ConfirmationRequest) -> Decision {
        self.asked.lock().unwrap().push(request.clone());
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Decision::Approve)
    }
}

/// Never answers; used to cancel while a call is paused.
pub struct PendingConfirmation;

#[async_trait]
impl ConfirmationHandler for PendingConfirmation {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Decision {
        futures::future::pending().await
    }
}

/// Deselects the given plan positions.
pub struct DeselectPlan {
    drop: Vec<usize>,
    shown: Mutex<Vec<Vec<TestSpec>>>,
}

impl DeselectPlan {
    pub fn new(drop: impl IntoIterator<Item = usize>) -> Self {
        Self {
            drop: drop.into_iter().collect(),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn shown(&self) -> Vec<Vec<TestSpec>> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlanSelector for DeselectPlan {
    async fn select(&self, tests: &[TestSpec]) -> Vec<TestSpec> {
        self.shown.lock().unwrap().push(tests.to_vec());
        tests
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.drop.contains(i))
            .map(|(_, t)| t.clone())
            .collect()
    }
}

/// Records everything a session reports.
#[derive(Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<SessionState>>,
    lines: Mutex<Vec<TranscriptLine>>,
    text: Mutex<String>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<TranscriptLine> {
        self.lines.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(|l| l.text).collect()
    }

    pub fn streamed(&self) -> String {
        self.text.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state(&self, state: SessionState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_text(&self, chunk: &str) {
        self.text.lock().unwrap().push_str(chunk);
    }

    fn on_line(&self, line: &TranscriptLine) {
        self.lines.lock().unwrap().push(line.clone());
    }
}

/// A conversation store whose disk is always full.
pub struct BrokenStore;

fn broken<T>() -> StoreResult<T> {
    Err(StoreError::storage("broken", "disk full"))
}

#[async_trait]
impl ConversationStore for BrokenStore {
    async fn create_conversation(&self, _: &str, _: &str, _: &str) -> StoreResult<Conversation> {
        broken()
    }

    async fn get_conversation(&self, _: &str, _: &str) -> StoreResult<Conversation> {
        broken()
    }

    async fn list_conversations(&self, _: &str) -> StoreResult<Vec<Conversation>> {
        broken()
    }

    async fn save_message(&self, _: &str, _: &str, _: &MessageRecord) -> StoreResult<()> {
        broken()
    }

    async fn get_messages(&self, _: &str, _: &str) -> StoreResult<Vec<StoredMessage>> {
        broken()
    }

    async fn update_title(&self, _: &str, _: &str, _: &str) -> StoreResult<()> {
        broken()
    }

    async fn delete_conversation(&self, _: &str, _: &str) -> StoreResult<()> {
        broken()
    }
}

/// Wraps a store and fails its first `failures` writes with a task error.
pub struct FlakyStore {
    inner: Arc<dyn ConversationStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn ConversationStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }

    fn trip(&self) -> StoreResult<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        self.failures.store(left - 1, Ordering::SeqCst);
        Err(StoreError::Task("blocking task panicked".into()))
    }
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn create_conversation(&self, project: &str, id: &str, title: &str) -> StoreResult<Conversation> {
        self.inner.create_conversation(project, id, title).await
    }

    async fn get_conversation(&self, project: &str, id: &str) -> StoreResult<Conversation> {
        self.inner.get_conversation(project, id).await
    }

    async fn list_conversations(&self, project: &str) -> StoreResult<Vec<Conversation>> {
        self.inner.list_conversations(project).await
    }

    async fn save_message(&self, project: &str, id: &str, record: &MessageRecord) -> StoreResult<()> {
        self.trip()?;
        self.inner.save_message(project, id, record).await
    }

    async fn get_messages(&self, project: &str, id: &str) -> StoreResult<Vec<StoredMessage>> {
        self.inner.get_messages(project, id).await
    }

    async fn update_title(&self, project: &str, id: &str, title: &str) -> StoreResult<()> {
        self.inner.update_title(project, id, title).await
    }

    async fn delete_conversation(&self, project: &str, id: &str) -> StoreResult<()> {
        self.inner.delete_conversation(project, id).await
    }
}
