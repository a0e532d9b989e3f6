//! The session state machine.
//!
//! [`Controller`] owns the history and every piece of per-session state. It
//! runs on the caller's task and processes one thing at a time: the relay
//! streams on a background task, single tool calls are dispatched on their
//! own task with a snapshot of the context, and test groups run inline.
//! Every committed turn is written to the conversation log before the next
//! model request goes out.

use super::cancel::CancelSwitch;
use super::log::ConversationLog;
use super::{NoopObserver, PlanSelector, SelectAll, SessionObserver, SessionState};
use crate::collab::{ExportedTest, TestSpec};
use crate::config::ProjectConfig;
use crate::confirmation::{
    AlwaysDenyHandler, ConfirmationGate, ConfirmationHandler, ConfirmationRequest, GateMode,
    Verdict,
};
use crate::conversation::{SharedConversationStore, replay};
use crate::error::{Error, LlmError, Result, ToolError};
use crate::group::{GroupReport, TestResult, group_label};
use crate::llm::{ChatRequest, SharedModel, ToolDefinition};
use crate::prompt::system_prompt;
use crate::relay::{DEFAULT_RELAY_CAPACITY, RelayEvent, StreamingRelay};
use crate::telemetry::{SessionMetrics, TurnTimer};
use crate::tool::{
    Collaborators, DispatchContext, ToolDispatcher, ToolKind, ToolOutcome, policy_for,
    tool_definitions,
};
use crate::transcript::TranscriptLine;
use crate::turn::{History, ToolCall, ToolResponse, Turn};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, trace, warn};

const SKIPPED_REASON: &str = "Tool execution denied by user";

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEnd {
    /// The model answered without further tool calls, or the turn stopped
    /// on an empty plan selection.
    Completed,
    /// The user cancelled.
    Cancelled,
    /// The model stream failed.
    Failed(LlmError),
}

/// What one user turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    /// How the turn ended.
    pub end: TurnEnd,
    /// Every HTTP test executed during the turn, in order.
    pub tests: Vec<TestResult>,
}

impl TurnReport {
    fn new(end: TurnEnd, tests: Vec<TestResult>) -> Self {
        Self { end, tests }
    }

    /// Executed tests that failed.
    #[must_use]
    pub fn tests_failed(&self) -> usize {
        self.tests.iter().filter(|t| !t.passed).count()
    }

    /// No stream error and no failed test.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self.end, TurnEnd::Failed(_)) && self.tests_failed() == 0
    }
}

enum StreamEnd {
    Finished(Vec<ToolCall>),
    Cancelled,
    Failed(LlmError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchEnd {
    /// Results are in the history; ask the model again.
    Continue,
    /// Nothing left to do this turn.
    Stop,
    Cancelled,
}

/// Builds a [`Controller`].
pub struct ControllerBuilder {
    model: SharedModel,
    collab: Collaborators,
    system_prompt: Option<String>,
    mode: GateMode,
    confirmations: Arc<dyn ConfirmationHandler>,
    plans: Arc<dyn PlanSelector>,
    observer: Arc<dyn SessionObserver>,
    project: Option<ProjectConfig>,
    working_dir: PathBuf,
    store: Option<(SharedConversationStore, String)>,
    cancel: CancelSwitch,
    relay_capacity: usize,
}

impl std::fmt::Debug for ControllerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerBuilder")
            .field("model", &self.model.name())
            .field("mode", &self.mode)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl ControllerBuilder {
    /// Start from a model and the tool collaborators.
    ///
    /// Defaults: interactive mode, every confirmation denied, every plan
    /// fully selected, no observer, no persistence.
    #[must_use]
    pub fn new(model: SharedModel, collab: Collaborators) -> Self {
        Self {
            model,
            collab,
            system_prompt: None,
            mode: GateMode::Interactive,
            confirmations: Arc::new(AlwaysDenyHandler),
            plans: Arc::new(SelectAll),
            observer: Arc::new(NoopObserver),
            project: None,
            working_dir: PathBuf::from("."),
            store: None,
            cancel: CancelSwitch::new(),
            relay_capacity: DEFAULT_RELAY_CAPACITY,
        }
    }

    /// Override the system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Interactive or auto-execute.
    #[must_use]
    pub const fn mode(mut self, mode: GateMode) -> Self {
        self.mode = mode;
        self
    }

    /// Who answers paused calls.
    #[must_use]
    pub fn confirmations(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmations = handler;
        self
    }

    /// Who selects plan subsets.
    #[must_use]
    pub fn plan_selector(mut self, selector: Arc<dyn PlanSelector>) -> Self {
        self.plans = selector;
        self
    }

    /// Who sees the session's output.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The API under test.
    #[must_use]
    pub fn project(mut self, project: ProjectConfig) -> Self {
        self.project = Some(project);
        self
    }

    /// Directory relative export paths resolve against.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Persist turns to `conversation_id` in `store`. Ignored for temporary projects.
    #[must_use]
    pub fn persist(mut self, store: SharedConversationStore, conversation_id: impl Into<String>) -> Self {
        self.store = Some((store, conversation_id.into()));
        self
    }

    /// Share a cancel switch with the front-end.
    #[must_use]
    pub fn cancel_switch(mut self, cancel: CancelSwitch) -> Self {
        self.cancel = cancel;
        self
    }

    /// Relay queue capacity.
    #[must_use]
    pub const fn relay_capacity(mut self, capacity: usize) -> Self {
        self.relay_capacity = capacity;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Controller {
        let project = self
            .project
            .unwrap_or_else(|| ProjectConfig::temporary(String::new()));
        let log = match self.store {
            Some(_) if project.temporary => {
                debug!(project = %project.id, "temporary project, conversation not persisted");
                None
            }
            Some((store, conversation_id)) => {
                Some(ConversationLog::new(store, project.id.clone(), conversation_id))
            }
            None => None,
        };
        let system_prompt = self
            .system_prompt
            .unwrap_or_else(|| system_prompt(&project.base_url, &[]));
        let context = DispatchContext {
            project_id: project.id.clone(),
            base_url: project.base_url.clone(),
            auth: project.auth.clone(),
            export_source: Vec::new(),
            working_dir: self.working_dir,
        };

        Controller {
            relay: StreamingRelay::new(self.model).with_capacity(self.relay_capacity),
            dispatcher: Arc::new(ToolDispatcher::new(self.collab)),
            confirmations: self.confirmations,
            plans: self.plans,
            observer: self.observer,
            system_prompt,
            tools: tool_definitions(),
            history: History::new(),
            state: SessionState::Idle,
            gate: ConfirmationGate::new(self.mode),
            cancel: self.cancel,
            context,
            last_plan: Vec::new(),
            last_group: None,
            metrics: SessionMetrics::default(),
            log,
        }
    }
}

/// Drives one session: user input, model turns, tool calls and persistence.
pub struct Controller {
    relay: StreamingRelay,
    dispatcher: Arc<ToolDispatcher>,
    confirmations: Arc<dyn ConfirmationHandler>,
    plans: Arc<dyn PlanSelector>,
    observer: Arc<dyn SessionObserver>,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
    history: History,
    state: SessionState,
    gate: ConfirmationGate,
    cancel: CancelSwitch,
    context: DispatchContext,
    last_plan: Vec<TestSpec>,
    last_group: Option<GroupReport>,
    metrics: SessionMetrics,
    log: Option<ConversationLog>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("turns", &self.history.len())
            .field("mode", &self.gate.mode())
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Start building a controller.
    #[must_use]
    pub fn builder(model: SharedModel, collab: Collaborators) -> ControllerBuilder {
        ControllerBuilder::new(model, collab)
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Committed history.
    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Session counters.
    #[must_use]
    pub const fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Id of the persisted conversation, if any.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.log.as_ref().map(ConversationLog::conversation_id)
    }

    /// Returns `true` while turns are written to the conversation log.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.log.as_ref().is_some_and(|log| !log.is_degraded())
    }

    /// Project id.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.context.project_id
    }

    /// Base URL of the API under test.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.context.base_url
    }

    /// The most recent test plan.
    #[must_use]
    pub fn last_plan(&self) -> &[TestSpec] {
        &self.last_plan
    }

    /// The most recent group run.
    #[must_use]
    pub const fn last_group(&self) -> Option<&GroupReport> {
        self.last_group.as_ref()
    }

    /// Switch that cancels the running turn.
    #[must_use]
    pub fn cancel_switch(&self) -> CancelSwitch {
        self.cancel.clone()
    }

    /// Run one user turn to completion: stream the answer, work through its
    /// tool calls and loop until the model stops calling tools. Blank input
    /// is ignored.
    pub async fn submit(&mut self, input: &str) -> TurnReport {
        let input = input.trim();
        if input.is_empty() {
            trace!("blank input ignored");
            return TurnReport::new(TurnEnd::Completed, Vec::new());
        }
        let timer = TurnTimer::start();
        let cancel = self.cancel.arm();
        let span = TurnTimer::turn_span(self.conversation_id());
        let mut tests = Vec::new();

        self.commit(Turn::user(input)).await;
        let end = self.drive(&cancel, &mut tests).instrument(span).await;
        self.finish_turn(end, tests, timer)
    }

    /// Run the most recent plan through plan selection, then let the model
    /// comment on the results.
    pub async fn run_last_plan(&mut self) -> TurnReport {
        if self.last_plan.is_empty() {
            self.emit(TranscriptLine::info(
                "No test plan available. Ask for a test plan first.",
            ));
            return TurnReport::new(TurnEnd::Completed, Vec::new());
        }
        let timer = TurnTimer::start();
        let cancel = self.cancel.arm();
        let span = TurnTimer::turn_span(self.conversation_id());
        let plan = self.last_plan.clone();
        let mut tests = Vec::new();

        let end = async {
            match self.execute_plan(None, plan, &cancel, &mut tests).await {
                BatchEnd::Continue => self.drive(&cancel, &mut tests).await,
                BatchEnd::Stop => TurnEnd::Completed,
                BatchEnd::Cancelled => self.finish_cancel(),
            }
        }
        .instrument(span)
        .await;
        self.finish_turn(end, tests, timer)
    }

    /// Start a new in-memory history. The persisted log is kept; later turns
    /// go to a fresh conversation.
    pub fn clear(&mut self) {
        self.history = History::new();
        self.last_plan.clear();
        self.last_group = None;
        if let Some(log) = self.log.as_mut() {
            log.rebind(uuid::Uuid::new_v4().to_string(), false);
        }
        self.emit(TranscriptLine::outcome(true, "✓ Conversation cleared"));
    }

    /// Load a persisted conversation, replay its transcript and continue it.
    ///
    /// # Errors
    ///
    /// Fails when the session has no store, the conversation does not exist
    /// or its messages do not form a valid history.
    pub async fn resume(&mut self, conversation_id: &str) -> Result<()> {
        let Some(log) = self.log.as_mut() else {
            return Err(Error::session(
                "this session does not persist conversations",
            ));
        };
        let store = Arc::clone(log.store());
        let project_id = log.project_id().to_string();

        let conversation = store.get_conversation(&project_id, conversation_id).await?;
        let messages = store.get_messages(&project_id, conversation_id).await?;
        let replayed = replay(conversation_id, &messages)?;
        log.rebind(conversation_id, true);

        info!(
            conversation = conversation_id,
            title = %conversation.title,
            turns = replayed.history.len(),
            "conversation resumed"
        );
        self.history = replayed.history;
        self.last_plan.clear();
        self.last_group = None;
        self.metrics.record_usage(replayed.usage);
        for line in &replayed.lines {
            self.observer.on_line(line);
        }
        if !self.history.is_settled() {
            warn!(
                conversation = conversation_id,
                pending = self.history.pending_calls().len(),
                "resumed conversation has unanswered tool calls"
            );
            self.close_pending(&json!({ "status": "cancelled" })).await;
        }
        Ok(())
    }

    fn finish_turn(&mut self, end: TurnEnd, tests: Vec<TestResult>, timer: TurnTimer) -> TurnReport {
        self.set_state(SessionState::Idle);
        timer.finish(&self.metrics);
        TurnReport::new(end, tests)
    }

    async fn drive(&mut self, cancel: &CancellationToken, tests: &mut Vec<TestResult>) -> TurnEnd {
        loop {
            let calls = match self.stream_response(cancel).await {
                StreamEnd::Finished(calls) => calls,
                StreamEnd::Cancelled => return self.finish_cancel(),
                StreamEnd::Failed(e) => return TurnEnd::Failed(e),
            };
            if calls.is_empty() {
                return TurnEnd::Completed;
            }
            match self.process_batch(&calls, cancel, tests).await {
                BatchEnd::Continue => {}
                BatchEnd::Stop => return TurnEnd::Completed,
                BatchEnd::Cancelled => return self.finish_cancel(),
            }
        }
    }

    async fn stream_response(&mut self, cancel: &CancellationToken) -> StreamEnd {
        self.set_state(SessionState::AwaitingModel);
        let request = ChatRequest::new(
            self.system_prompt.clone(),
            self.tools.clone(),
            self.history.snapshot(),
        );
        let mut handle = self.relay.start(request, cancel.clone());

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut calls = Vec::new();
        let mut usage = None;
        while let Some(event) = handle.recv().await {
            match event {
                RelayEvent::Text(chunk) => {
                    self.mark_streaming();
                    self.observer.on_text(&chunk);
                    text.push_str(&chunk);
                }
                RelayEvent::Reasoning(chunk) => {
                    self.mark_streaming();
                    self.observer.on_reasoning(&chunk);
                    reasoning.push_str(&chunk);
                }
                RelayEvent::ToolCalls(batch) => calls = normalize_ids(batch),
                RelayEvent::Usage(counters) => usage = Some(counters),
                RelayEvent::Done => {
                    self.observer.on_stream_end();
                    self.metrics.record_model_turn();
                    let mut turn = Turn::assistant(text)
                        .with_reasoning(reasoning)
                        .with_tool_calls(calls.clone());
                    if let Some(counters) = usage {
                        self.metrics.record_usage(counters);
                        turn = turn.with_usage(counters.input_tokens, counters.output_tokens);
                    }
                    self.commit(turn).await;
                    return StreamEnd::Finished(calls);
                }
                RelayEvent::Error(e) => {
                    self.observer.on_stream_end();
                    error!(error = %e, "model stream failed");
                    self.metrics.record_error(&e.to_string());
                    if !text.is_empty() || !reasoning.is_empty() {
                        self.commit(Turn::assistant(text).with_reasoning(reasoning))
                            .await;
                    }
                    self.emit(TranscriptLine::error(format!("Error: {e}")));
                    return StreamEnd::Failed(e);
                }
                RelayEvent::Cancelled => {
                    self.observer.on_stream_end();
                    if !text.is_empty() || !reasoning.is_empty() {
                        let content = if text.is_empty() {
                            "(cancelled)".to_string()
                        } else {
                            format!("{text} (cancelled)")
                        };
                        self.commit(Turn::assistant(content).with_reasoning(reasoning))
                            .await;
                    }
                    return StreamEnd::Cancelled;
                }
            }
        }
        StreamEnd::Failed(LlmError::stream("relay closed without a terminal event"))
    }

    /// Work through one batch of tool calls, strictly one at a time.
    async fn process_batch(
        &mut self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
        tests: &mut Vec<TestResult>,
    ) -> BatchEnd {
        self.gate.end_batch();
        let mut end = BatchEnd::Continue;
        for (index, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                end = BatchEnd::Cancelled;
                break;
            }
            self.metrics.record_tool_call(&call.name);

            match self.gate.check(policy_for(&call.name)) {
                Verdict::AutoDeny => {
                    self.emit(TranscriptLine::info(format!("Skipped: {}", call_label(call))));
                    self.commit(skipped_turn(call)).await;
                    continue;
                }
                Verdict::Ask => {
                    self.set_state(SessionState::AwaitingConfirmation);
                    let request =
                        ConfirmationRequest::new(call.id.clone(), call.name.clone(), call.arguments_value())
                            .with_remaining(calls.len() - index - 1);
                    let decision = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        decision = self.confirmations.confirm(&request) => Some(decision),
                    };
                    let Some(decision) = decision else {
                        end = BatchEnd::Cancelled;
                        break;
                    };
                    debug!(tool = %call.name, id = %call.id, ?decision, "confirmation answered");
                    self.gate.record(decision);
                    if !decision.is_approved() {
                        self.emit(TranscriptLine::info("Tool execution skipped"));
                        self.commit(skipped_turn(call)).await;
                        continue;
                    }
                }
                Verdict::Run => {}
            }

            let step = if ToolKind::from_name(&call.name) == Some(ToolKind::ExecuteTestGroup) {
                self.run_group_call(call, cancel, tests).await
            } else {
                self.run_single(call, cancel, tests).await
            };
            if step != BatchEnd::Continue {
                end = step;
                break;
            }
        }
        self.gate.end_batch();

        match end {
            BatchEnd::Continue => {}
            BatchEnd::Stop => {
                self.close_pending(&json!({
                    "status": "skipped",
                    "reason": "Batch stopped: no tests selected",
                }))
                .await;
            }
            BatchEnd::Cancelled => self.close_pending(&json!({ "status": "cancelled" })).await,
        }
        end
    }

    async fn run_single(
        &mut self,
        call: &ToolCall,
        cancel: &CancellationToken,
        tests: &mut Vec<TestResult>,
    ) -> BatchEnd {
        self.set_state(SessionState::ExecutingTool);
        let dispatcher = Arc::clone(&self.dispatcher);
        let context = self.dispatch_context();
        let owned = call.clone();
        let span = TurnTimer::tool_span(&call.name, &call.id);
        let mut task =
            tokio::spawn(async move { dispatcher.dispatch(&owned, &context).await }.instrument(span));

        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                task.abort();
                return BatchEnd::Cancelled;
            }
            joined = &mut task => joined,
        };
        let outcome = joined.unwrap_or_else(|e| {
            ToolOutcome::error(&ToolError::execution(format!("tool task failed: {e}")))
        });
        self.apply_outcome(call, outcome, tests).await;
        BatchEnd::Continue
    }

    async fn run_group_call(
        &mut self,
        call: &ToolCall,
        cancel: &CancellationToken,
        tests: &mut Vec<TestResult>,
    ) -> BatchEnd {
        match ToolDispatcher::group_tests(call) {
            Ok(plan) => self.execute_plan(Some(call), plan, cancel, tests).await,
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, error = %e, "invalid test group");
                self.apply_outcome(call, ToolOutcome::error(&e), tests).await;
                BatchEnd::Continue
            }
        }
    }

    /// Plan selection then sequential execution. `call` is the
    /// `ExecuteTestGroup` call being answered; `None` for `/run`.
    async fn execute_plan(
        &mut self,
        call: Option<&ToolCall>,
        plan: Vec<TestSpec>,
        cancel: &CancellationToken,
        tests: &mut Vec<TestResult>,
    ) -> BatchEnd {
        self.set_state(SessionState::ShowingPlan);
        let selected = match self.gate.mode() {
            GateMode::AutoExecute => plan,
            GateMode::Interactive => tokio::select! {
                biased;
                () = cancel.cancelled() => return BatchEnd::Cancelled,
                selected = self.plans.select(&plan) => selected,
            },
        };
        debug!(selected = selected.len(), "plan selected");

        if selected.is_empty() {
            self.emit(TranscriptLine::info("No tests selected for execution."));
            if let Some(call) = call {
                self.commit(Turn::tool(ToolResponse::for_call(
                    call,
                    json!({ "count": 0, "results": [], "status": "no_tests_selected" }),
                )))
                .await;
            }
            return BatchEnd::Stop;
        }

        self.set_state(SessionState::RunningTestGroup);
        self.emit(TranscriptLine::tool(group_label(&selected)));
        let observer = Arc::clone(&self.observer);
        let report = self
            .dispatcher
            .run_group(&selected, cancel, |result| {
                for line in result.group_lines() {
                    observer.on_line(&line);
                }
            })
            .await;

        for result in report.results() {
            self.metrics.record_test(result.passed);
        }
        tests.extend(report.results().cloned());
        if report.cancelled {
            if report.count() > 0 {
                self.last_group = Some(report);
            }
            return BatchEnd::Cancelled;
        }

        self.emit(report.summary_line());
        let response = report.to_response();
        let count = report.count();
        self.last_group = Some(report);
        match call {
            Some(call) => {
                self.commit(Turn::tool(ToolResponse::for_call(call, response)))
                    .await;
            }
            None => {
                self.commit(Turn::user(format!(
                    "Tests completed. {count} tests executed. Would you like me to analyze the results or run more tests?"
                )))
                .await;
            }
        }
        BatchEnd::Continue
    }

    async fn apply_outcome(&mut self, call: &ToolCall, outcome: ToolOutcome, tests: &mut Vec<TestResult>) {
        let ToolOutcome {
            response,
            lines,
            plan,
            tests: results,
            usage,
            is_error,
        } = outcome;

        for line in &lines {
            self.observer.on_line(line);
        }
        if let Some(plan) = plan {
            self.last_plan = plan;
        }
        if let Some(usage) = usage {
            self.metrics.record_usage(usage);
        }
        if is_error {
            let message = response.get("error").and_then(Value::as_str).unwrap_or_default();
            self.metrics.record_error(message);
        }
        for result in &results {
            self.metrics.record_test(result.passed);
        }
        tests.extend(results);
        self.commit(Turn::tool(ToolResponse::for_call(call, response)))
            .await;
    }

    /// Answer every outstanding call of the last assistant turn.
    async fn close_pending(&mut self, response: &Value) {
        let pending = self.history.pending_calls().to_vec();
        for call in &pending {
            self.commit(Turn::tool(ToolResponse::for_call(call, response.clone())))
                .await;
        }
    }

    fn finish_cancel(&mut self) -> TurnEnd {
        self.metrics.record_cancel();
        self.emit(TranscriptLine::info("Operation cancelled"));
        self.set_state(SessionState::Cancelled);
        TurnEnd::Cancelled
    }

    /// Append to the history and the conversation log.
    async fn commit(&mut self, turn: Turn) {
        trace!(role = %turn.role, calls = turn.tool_calls.len(), "committing turn");
        self.history.push(turn);
        if let (Some(log), Some(turn)) = (self.log.as_mut(), self.history.last()) {
            if let Some(warning) = log.append(turn).await {
                self.observer.on_line(&warning);
            }
        }
    }

    fn dispatch_context(&self) -> DispatchContext {
        let export_source = match &self.last_group {
            Some(group) if group.count() > 0 => group.exported(),
            _ => self.last_plan.iter().map(ExportedTest::from).collect(),
        };
        DispatchContext {
            export_source,
            ..self.context.clone()
        }
    }

    fn emit(&self, line: TranscriptLine) {
        self.observer.on_line(&line);
    }

    fn mark_streaming(&mut self) {
        if self.state == SessionState::AwaitingModel {
            self.set_state(SessionState::Streaming);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            trace!(from = %self.state, to = %state, "session state");
            self.state = state;
            self.observer.on_state(state);
        }
    }
}

/// Give every call an id; some providers omit them.
fn normalize_ids(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.is_empty() {
                call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
            call
        })
        .collect()
}

fn call_label(call: &ToolCall) -> String {
    let method = call.arguments.get("method").and_then(Value::as_str);
    let endpoint = call.arguments.get("endpoint").and_then(Value::as_str);
    match (method, endpoint) {
        (Some(method), Some(endpoint)) => format!("{method} {endpoint}"),
        _ => call.name.clone(),
    }
}

fn skipped_turn(call: &ToolCall) -> Turn {
    Turn::tool(ToolResponse::for_call(
        call,
        json!({ "status": "skipped", "reason": SKIPPED_REASON }),
    ))
}
