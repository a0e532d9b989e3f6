use super::StoredMessage;
use crate::error::{StoreError, StoreResult};
use crate::llm::Usage;
use crate::tool::ToolKind;
use crate::transcript::TranscriptLine;
use crate::turn::{History, JsonMap, Role, ToolCall, ToolResponse, Turn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// A turn in its stored form: message type, content and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message type.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Structured extras; `None` when there are none.
    pub metadata: Option<JsonMap>,
}

impl MessageRecord {
    /// Stored form of `turn`.
    ///
    /// # Errors
    ///
    /// Fails when a tool call cannot be serialized.
    pub fn from_turn(turn: &Turn) -> StoreResult<Self> {
        let mut metadata = JsonMap::new();
        let content = match turn.role {
            Role::User => turn.content.clone(),
            Role::Assistant => {
                if let Some(reasoning) = &turn.reasoning {
                    metadata.insert("reasoning".into(), json!(reasoning));
                }
                if turn.has_tool_calls() {
                    metadata.insert("tool_calls".into(), serde_json::to_value(&turn.tool_calls)?);
                }
                if let Some(tokens) = turn.input_tokens {
                    metadata.insert("input_tokens".into(), json!(tokens));
                }
                if let Some(tokens) = turn.output_tokens {
                    metadata.insert("output_tokens".into(), json!(tokens));
                }
                turn.content.clone()
            }
            Role::Tool => {
                let response = turn
                    .tool_response
                    .as_ref()
                    .ok_or_else(|| StoreError::corrupt("", "tool turn without response"))?;
                metadata.insert("tool_id".into(), json!(response.id));
                metadata.insert("tool_name".into(), json!(response.name));
                metadata.insert("tool_output".into(), Value::Object(response.response.clone()));
                format!("Tool: {}", response.name)
            }
        };
        Ok(Self {
            role: turn.role,
            content,
            metadata: (!metadata.is_empty()).then_some(metadata),
        })
    }

    /// The turn this message stores. `None` for rows replay skips.
    ///
    /// # Errors
    ///
    /// Fails when the metadata of an assistant or tool row is malformed.
    pub fn to_turn(&self, conversation_id: &str) -> StoreResult<Option<Turn>> {
        let meta = self.metadata.clone().unwrap_or_default();
        let corrupt = |reason: String| StoreError::corrupt(conversation_id, reason);
        let turn = match self.role {
            Role::User if self.content.is_empty() => return Ok(None),
            Role::User => Turn::user(self.content.clone()),
            Role::Assistant => {
                let mut turn = Turn::assistant(self.content.clone());
                if let Some(reasoning) = meta.get("reasoning").and_then(Value::as_str) {
                    turn = turn.with_reasoning(reasoning);
                }
                if let Some(calls) = meta.get("tool_calls") {
                    let calls: Vec<ToolCall> = serde_json::from_value(calls.clone())
                        .map_err(|e| corrupt(format!("bad tool_calls: {e}")))?;
                    turn = turn.with_tool_calls(calls);
                }
                turn.input_tokens = meta.get("input_tokens").and_then(Value::as_u64);
                turn.output_tokens = meta.get("output_tokens").and_then(Value::as_u64);
                turn
            }
            Role::Tool => {
                let field = |key: &str| {
                    meta.get(key)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| corrupt(format!("tool row without {key}")))
                };
                let response = match meta.get("tool_output") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => JsonMap::new(),
                };
                Turn::tool(ToolResponse {
                    id: field("tool_id")?,
                    name: field("tool_name")?,
                    response,
                })
            }
        };
        Ok(Some(turn))
    }
}

/// A conversation rebuilt from its messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replay {
    /// History, identical to the one that was persisted.
    pub history: History,
    /// Transcript to show again.
    pub lines: Vec<TranscriptLine>,
    /// Tokens recorded on assistant turns.
    pub usage: Usage,
}

/// Rebuild a conversation from its stored messages.
///
/// # Errors
///
/// Fails with [`StoreError::Corrupt`] when a row is malformed or the rows
/// break tool-call pairing.
pub fn replay(conversation_id: &str, messages: &[StoredMessage]) -> StoreResult<Replay> {
    let mut replay = Replay::default();
    for message in messages {
        let record = MessageRecord {
            role: message.role,
            content: message.content.clone(),
            metadata: message.metadata.clone(),
        };
        let Some(turn) = record.to_turn(conversation_id)? else {
            continue;
        };
        replay.lines.extend(transcript_of(&turn));
        replay.usage.input_tokens += turn.input_tokens.unwrap_or(0);
        replay.usage.output_tokens += turn.output_tokens.unwrap_or(0);
        replay
            .history
            .try_push(turn)
            .map_err(|v| StoreError::corrupt(conversation_id, v.to_string()))?;
    }
    debug!(
        conversation = conversation_id,
        turns = replay.history.len(),
        "conversation replayed"
    );
    Ok(replay)
}

fn transcript_of(turn: &Turn) -> Vec<TranscriptLine> {
    match turn.role {
        Role::User => vec![TranscriptLine::user(turn.content.clone())],
        Role::Assistant if turn.content.is_empty() => Vec::new(),
        Role::Assistant => vec![TranscriptLine::assistant(turn.content.clone())],
        Role::Tool => {
            let Some(response) = &turn.tool_response else {
                return Vec::new();
            };
            let heading = ToolKind::from_name(&response.name).map_or_else(
                || format!("Tool: {}", response.name),
                |kind| kind.display_name().to_string(),
            );
            let mut lines = vec![TranscriptLine::tool(heading)];
            if let Some(count) = response.response.get("count").and_then(Value::as_u64) {
                lines.push(TranscriptLine::detail(format!("Completed {count} tests")));
            }
            lines
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stored(turns: &[Turn]) -> Vec<StoredMessage> {
        turns
            .iter()
            .enumerate()
            .map(|(i, turn)| {
                let record = MessageRecord::from_turn(turn).unwrap();
                StoredMessage {
                    id: i64::try_from(i).unwrap() + 1,
                    conversation_id: "c1".into(),
                    role: record.role,
                    content: record.content,
                    metadata: record.metadata,
                    timestamp: Utc::now(),
                }
            })
            .collect()
    }

    fn sample_history() -> History {
        let call = ToolCall::new(
            "call_1",
            "ExecuteTestGroup",
            json!({"tests": [{"method": "GET", "endpoint": "/a"}]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let mut history = History::new();
        history.push(Turn::user("test /a"));
        history.push(
            Turn::assistant("Running it")
                .with_reasoning("one test is enough")
                .with_tool_calls(vec![call.clone()])
                .with_usage(120, 30),
        );
        history.push(Turn::tool(ToolResponse::for_call(
            &call,
            json!({"count": 1, "results": [{"passed": true}]}),
        )));
        history.push(Turn::user("thanks"));
        history.push(Turn::assistant("All good").with_usage(200, 10));
        history
    }

    #[test]
    fn test_tool_row_shape() {
        let call = ToolCall::new("call_9", "ExecuteTest", JsonMap::new());
        let turn = Turn::tool(ToolResponse::for_call(&call, json!({"passed": false})));
        let record = MessageRecord::from_turn(&turn).unwrap();
        assert_eq!(record.content, "Tool: ExecuteTest");
        let meta = record.metadata.unwrap();
        assert_eq!(meta["tool_id"], "call_9");
        assert_eq!(meta["tool_output"]["passed"], false);

        let plain = MessageRecord::from_turn(&Turn::assistant("hi")).unwrap();
        assert!(plain.metadata.is_none());
    }

    #[test]
    fn test_replay_reproduces_history() {
        let history = sample_history();
        let replay = replay("c1", &stored(history.turns())).unwrap();

        assert_eq!(replay.history, history);
        assert_eq!(replay.usage, Usage::new(320, 40));

        let texts: Vec<&str> = replay.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "test /a",
                "Running it",
                "Executing tests",
                "Completed 1 tests",
                "thanks",
                "All good"
            ]
        );
    }

    #[test]
    fn test_replay_skips_empty_user_rows() {
        let mut messages = stored(&[Turn::user("hi"), Turn::assistant("hello")]);
        messages.insert(
            1,
            StoredMessage {
                content: String::new(),
                ..messages[0].clone()
            },
        );
        let replay = replay("c1", &messages).unwrap();
        assert_eq!(replay.history.len(), 2);
    }

    #[test]
    fn test_replay_rejects_broken_pairing() {
        let call = ToolCall::new("call_1", "ExecuteTest", JsonMap::new());
        let turns = [
            Turn::user("go"),
            Turn::assistant("").with_tool_calls(vec![call]),
            Turn::user("no answer in between"),
        ];
        let mut messages = Vec::new();
        for turn in &turns {
            messages.extend(stored(std::slice::from_ref(turn)));
        }
        let err = replay("c1", &messages).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_unknown_tool_heading() {
        let call = ToolCall::new("x", "Legacy", JsonMap::new());
        let lines = transcript_of(&Turn::tool(ToolResponse::for_call(&call, json!({}))));
        assert_eq!(lines[0].text, "Tool: Legacy");
    }
}
