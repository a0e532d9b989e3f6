//! The session controller and the seams it talks to the front-end through.
//!
//! A session moves through the states of [`SessionState`]. The front-end
//! feeds it user input, observes it through a [`SessionObserver`], answers
//! paused calls through a
//! [`ConfirmationHandler`](crate::confirmation::ConfirmationHandler) and
//! picks plan subsets through a [`PlanSelector`].

mod cancel;
mod controller;
mod log;

pub use cancel::CancelSwitch;
pub use controller::{Controller, ControllerBuilder, TurnEnd, TurnReport};

use crate::collab::TestSpec;
use crate::transcript::TranscriptLine;
use async_trait::async_trait;
use std::fmt;

/// Where a session is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Waiting for user input.
    #[default]
    Idle,
    /// Request sent, nothing streamed yet.
    AwaitingModel,
    /// Model output arriving.
    Streaming,
    /// A tool call waits for the user's decision.
    AwaitingConfirmation,
    /// A single tool call is running.
    ExecutingTool,
    /// The user picks which planned tests run.
    ShowingPlan,
    /// Selected tests run one by one.
    RunningTestGroup,
    /// The user cancelled; the session returns to idle next.
    Cancelled,
}

impl SessionState {
    /// Returns `true` while a turn is in progress.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting model",
            Self::Streaming => "streaming",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::ExecutingTool => "executing tool",
            Self::ShowingPlan => "showing plan",
            Self::RunningTestGroup => "running test group",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Receives everything a session wants shown.
///
/// Callbacks run on the controller's task and must not block.
pub trait SessionObserver: Send + Sync {
    /// The session entered `state`.
    fn on_state(&self, _state: SessionState) {}

    /// A chunk of answer text.
    fn on_text(&self, _chunk: &str) {}

    /// A chunk of reasoning text.
    fn on_reasoning(&self, _chunk: &str) {}

    /// The current model response ended.
    fn on_stream_end(&self) {}

    /// A finished transcript line.
    fn on_line(&self, _line: &TranscriptLine) {}
}

/// Ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Lets the user choose which planned tests run.
#[async_trait]
pub trait PlanSelector: Send + Sync {
    /// The tests to run, in order. An empty selection runs nothing.
    async fn select(&self, tests: &[TestSpec]) -> Vec<TestSpec>;
}

/// Selects every test.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAll;

#[async_trait]
impl PlanSelector for SelectAll {
    async fn select(&self, tests: &[TestSpec]) -> Vec<TestSpec> {
        tests.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_all() {
        let tests = vec![TestSpec::new("GET", "/a"), TestSpec::new("GET", "/b")];
        assert_eq!(tokio_test::block_on(SelectAll.select(&tests)), tests);
    }

    #[test]
    fn test_state_activity() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::ShowingPlan.is_active());
        assert_eq!(SessionState::AwaitingConfirmation.to_string(), "awaiting confirmation");
    }
}
