//! Client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Covers `OpenAI` itself as well as `OpenRouter`, Ollama and llama.cpp, which
//! all speak the same streaming wire format.

use super::streaming::SseStreamParser;
use super::{ChatModel, ChatRequest, ChunkStream, StreamChunk, ToolDefinition, Usage};
use crate::error::LlmError;
use crate::turn::{JsonMap, Role, ToolCall, Turn};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default `OpenAI` API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Default base URL for a known provider name.
#[must_use]
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some(OPENAI_API_BASE_URL),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "llamacpp" => Some("http://localhost:8080/v1"),
        _ => None,
    }
}

/// Streaming chat client for OpenAI-compatible APIs.
#[derive(Clone)]
pub struct OpenAiCompatible {
    http_client: reqwest::Client,
    provider: Arc<str>,
    api_key: Option<Arc<str>>,
    base_url: Arc<str>,
    model: Arc<str>,
}

impl std::fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatible {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> OpenAiCompatibleBuilder {
        OpenAiCompatibleBuilder::default()
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(2);
        if let Some(key) = &self.api_key
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}"))
        {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": request.system_prompt}));
        }
        messages.extend(request.turns.iter().map(wire_message));

        let mut body = json!({
            "model": &*self.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !request.tools.is_empty() {
            body["tools"] = request.tools.iter().map(wire_tool).collect();
        }
        body
    }

    fn status_error(&self, status: u16, body: String) -> LlmError {
        match status {
            401 | 403 => LlmError::auth(&*self.provider, body),
            429 => LlmError::rate_limited(&*self.provider),
            _ => LlmError::http_status(status, body),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(provider = %self.provider, model = %self.model, turns = request.turns.len(), "sending chat request");

        let response = self
            .http_client
            .post(&url)
            .headers(self.headers())
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status.as_u16(), body));
        }

        let bytes: ByteStream = Box::pin(response.bytes_stream());
        let state = DecodeState {
            lines: SseStreamParser::new(bytes),
            calls: ToolCallAccumulator::default(),
            ready: VecDeque::new(),
            finished: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, DecodeState::next)))
    }
}

/// Builder for [`OpenAiCompatible`].
#[derive(Debug, Default)]
pub struct OpenAiCompatibleBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

impl OpenAiCompatibleBuilder {
    /// Provider name, used to pick a default base URL.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the API key. Local providers need none.
    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    /// Set a custom base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = (!url.is_empty()).then_some(url);
        self
    }

    /// Set the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the request timeout in seconds. Default is no timeout.
    #[must_use]
    pub const fn timeout_secs(mut self, timeout: Option<u64>) -> Self {
        self.timeout_secs = timeout;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Fails when no model or base URL can be determined, or when the HTTP
    /// client cannot be constructed.
    pub fn build(self) -> Result<OpenAiCompatible, LlmError> {
        let provider = self.provider.unwrap_or_else(|| "openai".to_string());
        let base_url = self
            .base_url
            .or_else(|| default_base_url(&provider).map(str::to_string))
            .ok_or_else(|| LlmError::provider(&provider, "no base URL configured"))?;
        let model = self
            .model
            .filter(|m| !m.is_empty())
            .ok_or_else(|| LlmError::provider(&provider, "no model configured"))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let http_client = builder
            .build()
            .map_err(|e| LlmError::provider(&provider, format!("failed to build HTTP client: {e}")))?;

        Ok(OpenAiCompatible {
            http_client,
            provider: provider.into(),
            api_key: self.api_key.map(Into::into),
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

fn wire_message(turn: &Turn) -> Value {
    match turn.role {
        Role::User => json!({"role": "user", "content": turn.content}),
        Role::Assistant => {
            let mut message = json!({"role": "assistant", "content": turn.content});
            if turn.has_tool_calls() {
                message["tool_calls"] = turn
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments_value().to_string(),
                            },
                        })
                    })
                    .collect();
            }
            message
        }
        Role::Tool => {
            let (id, content) = turn.tool_response.as_ref().map_or_else(
                || (String::new(), String::new()),
                |r| (r.id.clone(), Value::Object(r.response.clone()).to_string()),
            );
            json!({"role": "tool", "tool_call_id": id, "content": content})
        }
    }
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<FrameChoice>,
    usage: Option<FrameUsage>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FrameChoice {
    #[serde(default)]
    delta: FrameDelta,
}

#[derive(Debug, Default, Deserialize)]
struct FrameDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    #[serde(default)]
    function: FunctionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Reassembles tool calls whose fields arrive in fragments keyed by index.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    partial: BTreeMap<usize, (String, String, String)>,
}

impl ToolCallAccumulator {
    fn push(&mut self, delta: ToolCallDelta) {
        let entry = self.partial.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            entry.0.push_str(&id);
        }
        if let Some(name) = delta.function.name {
            entry.1.push_str(&name);
        }
        if let Some(arguments) = delta.function.arguments {
            entry.2.push_str(&arguments);
        }
    }

    fn finish(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.partial)
            .into_values()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, raw)| {
                let arguments = parse_arguments(&name, &raw);
                ToolCall::new(id, name, arguments)
            })
            .collect()
    }
}

fn parse_arguments(tool: &str, raw: &str) -> JsonMap {
    if raw.trim().is_empty() {
        return JsonMap::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool, arguments = %other, "tool arguments are not an object");
            JsonMap::new()
        }
        Err(e) => {
            warn!(tool, error = %e, "tool arguments are not valid JSON");
            JsonMap::new()
        }
    }
}

struct DecodeState {
    lines: SseStreamParser<ByteStream>,
    calls: ToolCallAccumulator,
    ready: VecDeque<StreamChunk>,
    finished: bool,
}

impl DecodeState {
    async fn next(mut self) -> Option<(Result<StreamChunk, LlmError>, Self)> {
        loop {
            if let Some(chunk) = self.ready.pop_front() {
                return Some((Ok(chunk), self));
            }
            if self.finished {
                return None;
            }
            match self.lines.next().await {
                Some(Ok(data)) => {
                    if let Err(e) = self.decode(&data) {
                        self.finished = true;
                        return Some((Err(e), self));
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some((Err(e), self));
                }
                None => {
                    self.finished = true;
                    let calls = self.calls.finish();
                    if !calls.is_empty() {
                        self.ready.push_back(StreamChunk::ToolCalls(calls));
                    }
                }
            }
        }
    }

    fn decode(&mut self, data: &str) -> Result<(), LlmError> {
        let frame: StreamFrame = serde_json::from_str(data)
            .map_err(|e| LlmError::response_format(format!("invalid stream frame: {e}")))?;

        if let Some(error) = frame.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Err(LlmError::stream(message));
        }

        for choice in frame.choices {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning)
                && !reasoning.is_empty()
            {
                self.ready.push_back(StreamChunk::Reasoning(reasoning));
            }
            if let Some(text) = delta.content
                && !text.is_empty()
            {
                self.ready.push_back(StreamChunk::Text(text));
            }
            for call in delta.tool_calls {
                self.calls.push(call);
            }
        }

        if let Some(usage) = frame.usage {
            self.ready.push_back(StreamChunk::Usage(Usage::new(
                usage.prompt_tokens,
                usage.completion_tokens,
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::turn::ToolResponse;

    fn state() -> DecodeState {
        let empty: ByteStream = Box::pin(futures::stream::empty());
        DecodeState {
            lines: SseStreamParser::new(empty),
            calls: ToolCallAccumulator::default(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    #[test]
    fn test_builder_defaults() {
        let client = OpenAiCompatible::builder()
            .provider("ollama")
            .model("llama3")
            .build()
            .unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434/v1");
        assert_eq!(client.model(), "llama3");
        assert!(client.api_key.is_none());
    }

    #[test]
    fn test_builder_requires_model() {
        let err = OpenAiCompatible::builder().api_key("k").build().unwrap_err();
        assert!(err.message.contains("no model"));
    }

    #[test]
    fn test_decode_text_reasoning_usage() {
        let mut state = state();
        state
            .decode(r#"{"choices":[{"delta":{"reasoning_content":"hmm","content":"Hi"}}]}"#)
            .unwrap();
        state
            .decode(r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#)
            .unwrap();
        let chunks: Vec<_> = state.ready.drain(..).collect();
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Reasoning("hmm".into()),
                StreamChunk::Text("Hi".into()),
                StreamChunk::Usage(Usage::new(12, 3)),
            ]
        );
    }

    #[test]
    fn test_fragmented_tool_calls_are_joined() {
        let mut state = state();
        state
            .decode(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"ExecuteTest","arguments":"{\"method\":"}}]}}]}"#)
            .unwrap();
        state
            .decode(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"GET\"}"}}]}}]}"#)
            .unwrap();
        let calls = state.calls.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "ExecuteTest");
        assert_eq!(calls[0].arguments.get("method"), Some(&json!("GET")));
    }

    #[test]
    fn test_error_frame() {
        let mut state = state();
        let err = state
            .decode(r#"{"error":{"message":"overloaded"}}"#)
            .unwrap_err();
        assert_eq!(err.message, "overloaded");
    }

    #[test]
    fn test_wire_messages() {
        let call = ToolCall::new("c1", "ExecuteTest", JsonMap::new());
        let assistant = Turn::assistant("").with_tool_calls(vec![call.clone()]);
        let wire = wire_message(&assistant);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "ExecuteTest");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{}");

        let tool = Turn::tool(ToolResponse::for_call(&call, json!({"passed": true})));
        let wire = wire_message(&tool);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "c1");
        assert_eq!(wire["content"], r#"{"passed":true}"#);
    }
}
