//! The seam between the session engine and an LLM service.
//!
//! The engine only needs two capabilities from a model: a streaming chat
//! call (driven by the [`relay`](crate::relay)) and a one-shot completion
//! (used for test planning). Both are expressed by [`ChatModel`].

mod openai;
mod streaming;

pub use openai::{OpenAiCompatible, OpenAiCompatibleBuilder};
pub use streaming::SseStreamParser;

use crate::error::LlmError;
use crate::turn::{ToolCall, Turn};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

/// Stream of incremental model output.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// Definition of a tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Everything a model call needs. Built from a snapshot of the session.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System prompt.
    pub system_prompt: String,
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
    /// Conversation so far.
    pub turns: Vec<Turn>,
}

impl ChatRequest {
    /// Create a request.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, tools: Vec<ToolDefinition>, turns: Vec<Turn>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            tools,
            turns,
        }
    }
}

/// Token counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

impl Usage {
    /// Create a usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Sum of both counters.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One piece of streamed model output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Visible answer text.
    Text(String),
    /// Reasoning text.
    Reasoning(String),
    /// Complete tool calls.
    ToolCalls(Vec<ToolCall>),
    /// Token counters.
    Usage(Usage),
}

/// Collected result of a non-streaming call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    /// Answer text.
    pub content: String,
    /// Reasoning text.
    pub reasoning: String,
    /// Tool calls, if any.
    pub tool_calls: Vec<ToolCall>,
    /// Token counters.
    pub usage: Usage,
}

/// A chat-capable language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider or model name, for logs.
    fn name(&self) -> &str;

    /// Start a streaming call.
    ///
    /// Dropping the returned stream abandons the call.
    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, LlmError>;

    /// Run a call to completion.
    ///
    /// The default implementation collects [`stream`](Self::stream).
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut stream = self.stream(request).await?;
        let mut response = ChatResponse::default();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Text(text) => response.content.push_str(&text),
                StreamChunk::Reasoning(text) => response.reasoning.push_str(&text),
                StreamChunk::ToolCalls(calls) => response.tool_calls.extend(calls),
                StreamChunk::Usage(usage) => response.usage = usage,
            }
        }
        Ok(response)
    }
}

/// Shared handle to a model.
pub type SharedModel = Arc<dyn ChatModel>;
