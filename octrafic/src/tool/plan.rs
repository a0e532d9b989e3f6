//! Test planning through a one-shot model completion.

use crate::collab::TestSpec;
use crate::error::ToolError;
use crate::llm::{ChatRequest, SharedModel, Usage};
use crate::turn::Turn;
use serde::Deserialize;
use tracing::{debug, warn};

/// Most test cases one plan may hold.
pub const MAX_PLAN_CASES: usize = 10;

/// System prompt of the planning call.
pub const PLANNER_SYSTEM_PROMPT: &str = r#"# Purpose
Generate API test cases from the user's request.

# Constraints
- Maximum 10 test cases per request
- Each test must include: method, endpoint, headers (optional), body (optional), requires_auth, expected_status (optional)
- Always use the provided endpoint details for accurate testing

# Available Context
HTTP methods: GET, POST, PUT, DELETE, PATCH
Authentication: Bearer token, Basic auth, API key header
Test focus options: "happy path", "authentication", "error handling", "all aspects"

# Output Format
Return a JSON object with a tests array. Each test:
{
  "method": "GET",
  "endpoint": "/users",
  "body": null,
  "requires_auth": true,
  "description": "List users"
}

Return pure JSON only - no markdown, no comments."#;

/// User message of the planning call.
#[must_use]
pub fn planning_prompt(what: &str, focus: &str) -> String {
    format!("Generate test cases for: {what}\nFocus: {focus}")
}

/// Strip a surrounding Markdown code fence, if any.
#[must_use]
pub fn extract_json_from_markdown(response: &str) -> &str {
    let fenced = |marker: &str| {
        let start = response.find(marker)? + marker.len();
        let end = response[start..].find("```")?;
        Some(response[start..start + end].trim())
    };
    let inner = if response.contains("```json") {
        fenced("```json")
    } else if response.contains("```") {
        fenced("```")
    } else {
        None
    };
    inner.unwrap_or_else(|| response.trim())
}

#[derive(Debug, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    tests: Vec<TestSpec>,
}

/// Asks the model for a test plan.
#[derive(Clone)]
pub struct TestPlanner {
    model: SharedModel,
}

impl std::fmt::Debug for TestPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPlanner")
            .field("model", &self.model.name())
            .finish()
    }
}

impl TestPlanner {
    /// Planner backed by `model`.
    #[must_use]
    pub fn new(model: SharedModel) -> Self {
        Self { model }
    }

    /// Generate at most [`MAX_PLAN_CASES`] tests.
    ///
    /// # Errors
    ///
    /// Fails when the model call fails or its reply is not a plan.
    pub async fn plan(&self, what: &str, focus: &str) -> Result<(Vec<TestSpec>, Usage), ToolError> {
        let request = ChatRequest::new(
            PLANNER_SYSTEM_PROMPT,
            Vec::new(),
            vec![Turn::user(planning_prompt(what, focus))],
        );
        let response = self
            .model
            .complete(request)
            .await
            .map_err(|e| ToolError::execution(format!("failed to generate test plan: {e}")))?;

        let mut tests = parse_plan(&response.content)?;
        if tests.len() > MAX_PLAN_CASES {
            debug!(count = tests.len(), "truncating oversized plan");
            tests.truncate(MAX_PLAN_CASES);
        }
        Ok((tests, response.usage))
    }
}

/// Parse a planner reply into test cases.
///
/// # Errors
///
/// Fails when the reply is not a `{"tests": [...]}` document.
pub fn parse_plan(reply: &str) -> Result<Vec<TestSpec>, ToolError> {
    let json = extract_json_from_markdown(reply);
    let document: PlanDocument = serde_json::from_str(json).map_err(|e| {
        warn!(error = %e, raw_response = %reply, "failed to parse test plan");
        ToolError::execution(format!("failed to parse test plan: {e}"))
    })?;
    Ok(document
        .tests
        .into_iter()
        .map(|mut test| {
            if test.body.as_ref().is_some_and(serde_json::Value::is_null) {
                test.body = None;
            }
            test
        })
        .collect())
}
