//! Confirmation gate in front of side-effecting tool calls.
//!
//! Every tool carries a [`ConfirmationPolicy`] next to its schema. Calls
//! with [`ConfirmationPolicy::Confirm`] pause for a [`ConfirmationHandler`]
//! unless the session runs in [`GateMode::AutoExecute`]. A
//! [`Decision::SkipRemaining`] answer denies every later confirm-policy call
//! of the same batch without asking again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a tool runs straight away or waits for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// Read-only, planning-only, or already approved through plan selection.
    Auto,
    /// Requires interactive approval.
    #[default]
    Confirm,
}

/// How the session treats confirm-policy tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateMode {
    /// Ask the user.
    #[default]
    Interactive,
    /// Headless runs: approve everything.
    AutoExecute,
}

/// The user's answer to a paused call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Run the call now.
    Approve,
    /// Skip this call and continue.
    Deny,
    /// Skip this call and every remaining confirm-policy call in the batch.
    SkipRemaining,
}

impl Decision {
    /// Returns `true` if the call should run.
    #[must_use]
    pub const fn is_approved(self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// What the gate says about one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Dispatch without asking.
    Run,
    /// Pause for the handler.
    Ask,
    /// Denied by an earlier skip-remaining answer.
    AutoDeny,
}

/// A call waiting for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Tool call id.
    pub call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Raw arguments.
    pub arguments: Value,
    /// Human-readable summary of the call.
    pub description: String,
    /// Calls of the same batch still queued behind this one.
    pub remaining: usize,
}

impl ConfirmationRequest {
    /// Create a request with a generated description.
    #[must_use]
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        let tool_name = tool_name.into();
        let description = describe(&tool_name, &arguments);
        Self {
            call_id: call_id.into(),
            tool_name,
            arguments,
            description,
            remaining: 0,
        }
    }

    /// Set the number of queued calls.
    #[must_use]
    pub const fn with_remaining(mut self, remaining: usize) -> Self {
        self.remaining = remaining;
        self
    }
}

fn describe(tool_name: &str, arguments: &Value) -> String {
    let method = arguments.get("method").and_then(Value::as_str);
    let endpoint = arguments.get("endpoint").and_then(Value::as_str);
    match (method, endpoint) {
        (Some(method), Some(endpoint)) => format!("{tool_name}: {method} {endpoint}"),
        _ => format!(
            "{tool_name} with arguments:\n{}",
            serde_json::to_string_pretty(arguments).unwrap_or_else(|_| arguments.to_string())
        ),
    }
}

/// Asks the user about a paused call.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    /// Wait for the user's decision. The controller races this against the
    /// session's cancellation signal.
    async fn confirm(&self, request: &ConfirmationRequest) -> Decision;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApproveHandler;

#[async_trait]
impl ConfirmationHandler for AutoApproveHandler {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Decision {
        Decision::Approve
    }
}

/// Denies everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDenyHandler;

#[async_trait]
impl ConfirmationHandler for AlwaysDenyHandler {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Decision {
        Decision::Deny
    }
}

/// Per-session gate state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmationGate {
    mode: GateMode,
    skip_remaining: bool,
}

impl ConfirmationGate {
    /// A gate in `mode`.
    #[must_use]
    pub const fn new(mode: GateMode) -> Self {
        Self {
            mode,
            skip_remaining: false,
        }
    }

    /// The session mode.
    #[must_use]
    pub const fn mode(&self) -> GateMode {
        self.mode
    }

    /// Verdict for a call with `policy`.
    #[must_use]
    pub const fn check(&self, policy: ConfirmationPolicy) -> Verdict {
        match (policy, self.mode) {
            (ConfirmationPolicy::Auto, _) | (_, GateMode::AutoExecute) => Verdict::Run,
            (ConfirmationPolicy::Confirm, GateMode::Interactive) if self.skip_remaining => {
                Verdict::AutoDeny
            }
            (ConfirmationPolicy::Confirm, GateMode::Interactive) => Verdict::Ask,
        }
    }

    /// Remember a decision for the rest of the batch.
    pub const fn record(&mut self, decision: Decision) {
        if matches!(decision, Decision::SkipRemaining) {
            self.skip_remaining = true;
        }
    }

    /// Forget batch state once the batch is answered.
    pub const fn end_batch(&mut self) {
        self.skip_remaining = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auto_policy_never_asks() {
        let gate = ConfirmationGate::new(GateMode::Interactive);
        assert_eq!(gate.check(ConfirmationPolicy::Auto), Verdict::Run);
        assert_eq!(gate.check(ConfirmationPolicy::Confirm), Verdict::Ask);
    }

    #[test]
    fn test_auto_execute_mode() {
        let gate = ConfirmationGate::new(GateMode::AutoExecute);
        assert_eq!(gate.check(ConfirmationPolicy::Confirm), Verdict::Run);
    }

    #[test]
    fn test_skip_remaining_cascades_until_batch_ends() {
        let mut gate = ConfirmationGate::new(GateMode::Interactive);
        gate.record(Decision::Deny);
        assert_eq!(gate.check(ConfirmationPolicy::Confirm), Verdict::Ask);

        gate.record(Decision::SkipRemaining);
        assert_eq!(gate.check(ConfirmationPolicy::Confirm), Verdict::AutoDeny);
        assert_eq!(gate.check(ConfirmationPolicy::Auto), Verdict::Run);

        gate.end_batch();
        assert_eq!(gate.check(ConfirmationPolicy::Confirm), Verdict::Ask);
    }

    #[test]
    fn test_request_description() {
        let req = ConfirmationRequest::new(
            "call_1",
            "ExecuteTest",
            json!({"method": "GET", "endpoint": "/ping"}),
        );
        assert_eq!(req.description, "ExecuteTest: GET /ping");

        let req = ConfirmationRequest::new("call_2", "Other", json!({"x": 1})).with_remaining(2);
        assert!(req.description.starts_with("Other with arguments:"));
        assert_eq!(req.remaining, 2);
    }

    #[tokio::test]
    async fn test_fixed_handlers() {
        let req = ConfirmationRequest::new("c", "ExecuteTest", json!({}));
        assert_eq!(AutoApproveHandler.confirm(&req).await, Decision::Approve);
        assert_eq!(AlwaysDenyHandler.confirm(&req).await, Decision::Deny);
        assert!(Decision::Approve.is_approved());
        assert!(!Decision::SkipRemaining.is_approved());
    }
}
