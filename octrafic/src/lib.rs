//! Octrafic is a conversational engine for exploring and testing HTTP APIs
//! with an LLM agent.
//!
//! A [`Controller`] runs one session: it streams model output through the
//! [`relay`], pauses state-changing tool calls at the [`confirmation`] gate,
//! runs test groups sequentially through [`group`] and writes every turn to
//! a [`conversation`] log that can be resumed later.

pub mod collab;
pub mod config;
pub mod confirmation;
pub mod conversation;
pub mod error;
pub mod group;
pub mod llm;
pub mod prompt;
pub mod relay;
pub mod session;
pub mod telemetry;
pub mod tool;
pub mod transcript;
pub mod turn;

#[cfg(test)]
mod testing;

pub use confirmation::{
    AutoApproveHandler, ConfirmationHandler, ConfirmationRequest, Decision, GateMode,
};
pub use conversation::{ConversationStore, SharedConversationStore, SqliteConversationStore};
pub use error::{Error, Result};
pub use llm::{ChatModel, OpenAiCompatible, SharedModel};
pub use session::{
    CancelSwitch, Controller, ControllerBuilder, PlanSelector, SessionObserver, SessionState,
    TurnEnd, TurnReport,
};
pub use tool::{Collaborators, TestPlanner, ToolKind};
pub use transcript::{LineKind, TranscriptLine};
pub use turn::{History, Role, ToolCall, ToolResponse, Turn};
