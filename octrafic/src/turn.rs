//! Conversation turns and the ordered history a session sends to the model.
//!
//! [`History`] is the only place turns are appended, and it enforces the
//! protocol-ordering rule the LLM services rely on: once an assistant turn
//! carries tool calls, the following turns must be `tool` turns answering
//! those calls in emission order before anything else may be appended.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// JSON object used for tool arguments and tool responses.
pub type JsonMap = Map<String, Value>;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human input.
    User,
    /// Model output.
    Assistant,
    /// Result of a tool call, fed back to the model.
    Tool,
}

impl Role {
    /// Stable lowercase name, also used as the persisted message type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model-issued request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id assigned by the model, unique within a turn.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw arguments as emitted by the model.
    #[serde(default)]
    pub arguments: JsonMap,
}

impl ToolCall {
    /// Create a tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: JsonMap) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Arguments as a JSON value.
    #[must_use]
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Result of a tool call, paired with it by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Id of the answered [`ToolCall`].
    pub id: String,
    /// Name of the answered tool.
    pub name: String,
    /// Response payload.
    pub response: JsonMap,
}

impl ToolResponse {
    /// Create a response for `call`.
    ///
    /// Non-object payloads are wrapped as `{"result": value}`.
    #[must_use]
    pub fn for_call(call: &ToolCall, response: Value) -> Self {
        let response = match response {
            Value::Object(map) => map,
            other => {
                let mut map = JsonMap::new();
                map.insert("result".into(), other);
                map
            }
        };
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response,
        }
    }
}

/// One appended unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Author.
    pub role: Role,
    /// Text content (empty for tool turns).
    #[serde(default)]
    pub content: String,
    /// Reasoning text streamed alongside the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool calls emitted by the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool result carried by a `tool` turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<ToolResponse>,
    /// Prompt tokens reported for this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Completion tokens reported for this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

impl Turn {
    const fn empty(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            reasoning: None,
            tool_calls: Vec::new(),
            tool_response: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::empty(Role::User, content.into())
    }

    /// An assistant message without tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::empty(Role::Assistant, content.into())
    }

    /// A tool turn answering one call.
    #[must_use]
    pub fn tool(response: ToolResponse) -> Self {
        Self {
            tool_response: Some(response),
            ..Self::empty(Role::Tool, String::new())
        }
    }

    /// Attach tool calls.
    #[must_use]
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Attach reasoning text; empty text is ignored.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        let reasoning = reasoning.into();
        self.reasoning = (!reasoning.is_empty()).then_some(reasoning);
        self
    }

    /// Attach token counters.
    #[must_use]
    pub const fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = Some(input_tokens);
        self.output_tokens = Some(output_tokens);
        self
    }

    /// Returns `true` if the turn carries at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// An append that would break tool-call/tool-response pairing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolViolation {
    /// A call is still unanswered and a non-tool turn was appended.
    #[error("tool call {expected} is unanswered but a {got} turn was appended")]
    UnansweredCall {
        /// Id of the call that must be answered next.
        expected: String,
        /// Role of the rejected turn.
        got: Role,
    },

    /// A tool turn answers a different call than the next pending one.
    #[error("tool response {got} does not answer pending call {expected}")]
    MismatchedResponse {
        /// Id of the call that must be answered next.
        expected: String,
        /// Id carried by the rejected response.
        got: String,
    },

    /// A tool turn arrived with no call pending.
    #[error("tool response {0} has no matching tool call")]
    OrphanResponse(String),

    /// A tool turn without a response payload.
    #[error("tool turn carries no tool response")]
    MissingResponse,
}

/// Ordered, append-only list of turns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    turns: Vec<Turn>,
    /// Calls of the latest assistant turn not yet answered, in emission order.
    pending: Vec<ToolCall>,
}

impl History {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn produced by the controller.
    ///
    /// # Panics
    ///
    /// Panics if the turn breaks tool-call/tool-response pairing. The
    /// controller only produces well-ordered turns, so this indicates a bug.
    pub fn push(&mut self, turn: Turn) {
        if let Err(violation) = self.try_push(turn) {
            unreachable!("protocol ordering violated: {violation}");
        }
    }

    /// Append a turn from an untrusted source, such as a replayed log.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] and leaves the history untouched when
    /// the turn is out of order.
    pub fn try_push(&mut self, turn: Turn) -> Result<(), ProtocolViolation> {
        match (turn.role, self.pending.first()) {
            (Role::Tool, Some(expected)) => {
                let response = turn
                    .tool_response
                    .as_ref()
                    .ok_or(ProtocolViolation::MissingResponse)?;
                if response.id != expected.id {
                    return Err(ProtocolViolation::MismatchedResponse {
                        expected: expected.id.clone(),
                        got: response.id.clone(),
                    });
                }
                self.pending.remove(0);
            }
            (Role::Tool, None) => {
                let id = turn
                    .tool_response
                    .as_ref()
                    .map(|r| r.id.clone())
                    .ok_or(ProtocolViolation::MissingResponse)?;
                return Err(ProtocolViolation::OrphanResponse(id));
            }
            (role, Some(expected)) => {
                return Err(ProtocolViolation::UnansweredCall {
                    expected: expected.id.clone(),
                    got: role,
                });
            }
            (_, None) => {
                if turn.role == Role::Assistant {
                    self.pending.clone_from(&turn.tool_calls);
                }
            }
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Calls still awaiting a tool turn, in the order they must be answered.
    #[must_use]
    pub fn pending_calls(&self) -> &[ToolCall] {
        &self.pending
    }

    /// Returns `true` when every tool call has been answered.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    /// All turns in order.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if no turn has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent turn.
    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Copy of the turns for a background request.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }
}
