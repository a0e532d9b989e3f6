//! Session counters, reported through `tracing` and `/info`.

use crate::llm::Usage;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{Span, debug, debug_span, info, info_span};

/// Counters accumulated over the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Model round-trips that completed.
    pub model_turns: usize,
    /// Total input tokens.
    pub input_tokens: u64,
    /// Total output tokens.
    pub output_tokens: u64,
    /// Tool calls dispatched, including denied ones.
    pub tool_calls: usize,
    /// HTTP tests executed.
    pub tests_run: usize,
    /// HTTP tests that failed.
    pub tests_failed: usize,
    /// Stream and tool errors.
    pub errors: usize,
    /// Turns cancelled by the user.
    pub cancellations: usize,
}

impl SessionMetrics {
    /// Total tokens (input + output).
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// HTTP tests that passed.
    #[must_use]
    pub const fn tests_passed(&self) -> usize {
        self.tests_run.saturating_sub(self.tests_failed)
    }

    /// Record token usage of one model response.
    pub const fn record_usage(&mut self, usage: Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
    }

    /// Record a completed model turn.
    pub const fn record_model_turn(&mut self) {
        self.model_turns += 1;
    }

    /// Record a dispatched tool call.
    pub fn record_tool_call(&mut self, tool: &str) {
        self.tool_calls += 1;
        debug!(tool, "tool_called");
    }

    /// Record one executed HTTP test.
    pub const fn record_test(&mut self, passed: bool) {
        self.tests_run += 1;
        if !passed {
            self.tests_failed += 1;
        }
    }

    /// Record an error.
    pub fn record_error(&mut self, error: &str) {
        self.errors += 1;
        debug!(error, "session_error");
    }

    /// Record a user cancellation.
    pub const fn record_cancel(&mut self) {
        self.cancellations += 1;
    }
}

impl std::fmt::Display for SessionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "  Tokens:     {} (in: {}, out: {})",
            self.total_tokens(),
            self.input_tokens,
            self.output_tokens
        )?;
        writeln!(f, "  Turns:      {}", self.model_turns)?;
        writeln!(f, "  Tool calls: {}", self.tool_calls)?;
        writeln!(
            f,
            "  Tests:      {} ({} passed, {} failed)",
            self.tests_run,
            self.tests_passed(),
            self.tests_failed
        )?;
        write!(f, "  Errors:     {}", self.errors)
    }
}

/// Times one user turn and emits its summary event.
#[derive(Debug, Clone, Copy)]
pub struct TurnTimer {
    start: Instant,
}

impl Default for TurnTimer {
    fn default() -> Self {
        Self::start()
    }
}

impl TurnTimer {
    /// Start timing.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log the end of the turn against the session totals.
    pub fn finish(self, metrics: &SessionMetrics) {
        info!(
            duration_ms = self.elapsed().as_millis(),
            input_tokens = metrics.input_tokens,
            output_tokens = metrics.output_tokens,
            tool_calls = metrics.tool_calls,
            "turn_completed"
        );
    }

    /// Span for one user turn.
    #[must_use]
    pub fn turn_span(conversation: Option<&str>) -> Span {
        info_span!("turn", conversation = conversation.unwrap_or("ephemeral"))
    }

    /// Span for one tool call.
    #[must_use]
    pub fn tool_span(tool: &str, id: &str) -> Span {
        debug_span!("tool_call", tool = %tool, id = %id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_metrics() {
        let mut metrics = SessionMetrics::default();
        metrics.record_model_turn();
        metrics.record_usage(Usage::new(100, 50));
        metrics.record_usage(Usage::new(10, 5));
        metrics.record_tool_call("ExecuteTest");
        metrics.record_test(true);
        metrics.record_test(false);
        metrics.record_error("boom");

        assert_eq!(metrics.total_tokens(), 165);
        assert_eq!(metrics.tests_passed(), 1);
        assert_eq!(metrics.tests_failed, 1);
        assert_eq!(metrics.errors, 1);

        let summary = metrics.to_string();
        assert!(summary.contains("Tokens:     165 (in: 110, out: 55)"));
        assert!(summary.contains("2 (1 passed, 1 failed)"));
    }

    #[test]
    fn test_turn_timer() {
        let timer = TurnTimer::start();
        assert!(timer.elapsed() < Duration::from_secs(5));
        timer.finish(&SessionMetrics::default());
    }
}
