//! System prompt of the chat agent.

use crate::collab::Endpoint;
use std::fmt::Write as _;

const BASE_PROMPT: &str = r#"You are Octrafic, an assistant that explores and tests HTTP APIs.

# Workflow
1. Call get_endpoints_details for the endpoints you need before writing tests.
2. Use GenerateTestPlan for anything larger than one request, then ExecuteTestGroup with the planned tests.
3. Use ExecuteTest for a single request the user asked for explicitly.
4. Summarize results briefly. Offer GenerateReport or ExportTests when the user wants artifacts.

# Rules
- Never invent endpoints that are not listed for the project.
- Use paths relative to the base URL.
- Set requires_auth only for endpoints that need credentials.
- Set expected_status when a test expects something other than 200.
- If a tool returns an error, fix the arguments and try again instead of giving up.
- If the user skipped a tool call, do not repeat it without asking."#;

/// Most endpoints listed inline; the model looks the rest up by name.
pub const MAX_LISTED_ENDPOINTS: usize = 200;

/// System prompt for a project at `base_url` with `endpoints`.
#[must_use]
pub fn system_prompt(base_url: &str, endpoints: &[Endpoint]) -> String {
    let mut prompt = String::from(BASE_PROMPT);
    let _ = write!(prompt, "\n\n# Project\nBase URL: {base_url}\n");
    if endpoints.is_empty() {
        prompt.push_str("No endpoints are registered; ask the user which paths to test.\n");
        return prompt;
    }
    prompt.push_str("Endpoints:\n");
    for endpoint in endpoints.iter().take(MAX_LISTED_ENDPOINTS) {
        let _ = write!(prompt, "- {} {}", endpoint.method, endpoint.path);
        if endpoint.requires_auth {
            prompt.push_str(" (auth)");
        }
        if !endpoint.description.is_empty() {
            let _ = write!(prompt, ": {}", endpoint.description);
        }
        prompt.push('\n');
    }
    if endpoints.len() > MAX_LISTED_ENDPOINTS {
        let _ = writeln!(
            prompt,
            "... and {} more",
            endpoints.len() - MAX_LISTED_ENDPOINTS
        );
    }
    prompt
}
