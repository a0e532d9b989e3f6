//! Unified error types for the octrafic engine.
//!
//! The hierarchy mirrors the way failures are treated by a session:
//! - [`LlmError`] ends the current turn (stream errors are never retried)
//! - [`ToolError`] is reported back to the model as a tool response
//! - [`StoreError`] degrades the session to in-memory only
//! - [`ConfigError`] is surfaced at startup

use std::fmt;

/// Result type alias for octrafic operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the octrafic engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// LLM provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool execution error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Conversation store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Session runtime error.
    #[error("Session error: {0}")]
    Session(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a session error with a message.
    #[must_use]
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }
}

/// Error type for LLM provider operations.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct LlmError {
    /// The error kind.
    pub kind: LlmErrorKind,
    /// The provider name (e.g., "openai", "ollama").
    pub provider: Option<String>,
    /// Additional error message.
    pub message: String,
    /// Optional error code from the provider.
    pub code: Option<String>,
}

/// Categories of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LlmErrorKind {
    /// Authentication or authorization failure.
    Auth,
    /// Rate limit exceeded.
    RateLimited,
    /// Response could not be decoded.
    ResponseFormat,
    /// Network or connection error.
    Network,
    /// Streaming error.
    Stream,
    /// HTTP status error.
    HttpStatus,
    /// Provider-specific error.
    Provider,
}

impl LlmError {
    const fn with_kind(kind: LlmErrorKind, message: String) -> Self {
        Self {
            kind,
            provider: None,
            message,
            code: None,
        }
    }

    /// Create an authentication error.
    #[must_use]
    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Self::with_kind(LlmErrorKind::Auth, message.into())
        }
    }

    /// Create a rate limit error.
    #[must_use]
    pub fn rate_limited(provider: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Self::with_kind(
                LlmErrorKind::RateLimited,
                "Rate limit exceeded. Please retry after some time.".into(),
            )
        }
    }

    /// Create a response format error.
    #[must_use]
    pub fn response_format(message: impl Into<String>) -> Self {
        Self::with_kind(LlmErrorKind::ResponseFormat, message.into())
    }

    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::with_kind(LlmErrorKind::Network, message.into())
    }

    /// Create a streaming error.
    #[must_use]
    pub fn stream(message: impl Into<String>) -> Self {
        Self::with_kind(LlmErrorKind::Stream, message.into())
    }

    /// Create an HTTP status error.
    #[must_use]
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            code: Some(status.to_string()),
            ..Self::with_kind(
                LlmErrorKind::HttpStatus,
                format!("HTTP {status}: {}", body.into()),
            )
        }
    }

    /// Create a provider-specific error.
    #[must_use]
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Self::with_kind(LlmErrorKind::Provider, message.into())
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{provider}] ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for LlmError {}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {err}"))
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Error type for tool dispatch failures.
///
/// None of these are fatal: the dispatcher turns each into an
/// `{"error": ...}` tool response so the model can adapt on its next turn.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// Missing or mistyped arguments.
    #[error("invalid arguments for {tool}: {message}")]
    Validation {
        /// Tool whose arguments failed to decode.
        tool: String,
        /// Decoder message.
        message: String,
    },

    /// The tool ran but its side effect failed (HTTP, file I/O, planning).
    #[error("{0}")]
    Execution(String),

    /// No tool is registered under this name.
    #[error("unknown tool: {0}")]
    NotFound(String),

    /// The tool needs session state and cannot run through plain dispatch.
    #[error("{0} must run through the session controller")]
    Unavailable(&'static str),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create an execution error.
    #[must_use]
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Returns `true` for argument errors the model can fix by itself.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Error type for conversation persistence.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// JSON (de)serialization of message metadata failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend encountered an error.
    #[error("[{backend}] {message}")]
    Storage {
        /// Backend identifier (e.g., `"sqlite"`).
        backend: &'static str,
        /// Human-readable error description.
        message: String,
    },

    /// Persisted data does not form a valid conversation.
    #[error("conversation {id} is corrupt: {reason}")]
    Corrupt {
        /// Conversation id.
        id: String,
        /// What failed to replay.
        reason: String,
    },

    /// No conversation with this id.
    #[error("conversation not found: {0}")]
    NotFound(String),

    /// An id that cannot name a file inside the store.
    #[error("invalid id: {0:?}")]
    InvalidId(String),

    /// A blocking task failed to join.
    #[error("task error: {0}")]
    Task(String),

    /// Filesystem error around the database files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Creates a [`Storage`](Self::Storage) error for the given backend.
    #[must_use]
    pub fn storage(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            backend,
            message: message.into(),
        }
    }

    /// Creates a [`Corrupt`](Self::Corrupt) error.
    #[must_use]
    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this is a transient error that may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Task(_))
    }
}

/// Enables `?` on [`rusqlite::Error`] inside closures returning [`StoreError`].
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage("sqlite", e.to_string())
    }
}

/// Convenience alias for store-scoped results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File could not be read or written.
    #[error("failed to access {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File contents are not valid JSON for the expected shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A required value is absent.
    #[error("missing configuration value: {0}")]
    Missing(String),

    /// No platform directory could be determined.
    #[error("could not determine the {0} directory")]
    NoDirectory(&'static str),
}

impl ConfigError {
    /// Create a missing-value error.
    #[must_use]
    pub fn missing(what: impl Into<String>) -> Self {
        Self::Missing(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::auth("openai", "bad key");
        assert_eq!(err.to_string(), "[openai] bad key");

        let err = LlmError::http_status(500, "boom");
        assert_eq!(err.to_string(), "HTTP 500: boom (code: 500)");
    }

    #[test]
    fn test_tool_error_messages() {
        let err = ToolError::validation("ExecuteTest", "missing field `method`");
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "invalid arguments for ExecuteTest: missing field `method`"
        );
        assert_eq!(
            ToolError::NotFound("Nope".into()).to_string(),
            "unknown tool: Nope"
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: StoreError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, StoreError::Storage { backend: "sqlite", .. }));
        assert!(!err.is_retryable());
        assert!(StoreError::Task("join failed".into()).is_retryable());

        let top: Error = err.into();
        assert!(top.to_string().starts_with("Store error:"));
    }
}
