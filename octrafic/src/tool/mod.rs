//! Tools the model may call.
//!
//! Every tool is described by a [`ToolSpec`]: its name, a description for
//! the model, the JSON schema of its arguments (generated from the typed
//! argument struct in [`args`]) and its [`ConfirmationPolicy`]. Schema,
//! decoder and policy live together so they cannot drift apart.

pub mod args;
mod dispatch;
mod plan;

pub use dispatch::{Collaborators, DispatchContext, ToolDispatcher, ToolOutcome};
pub use plan::{PLANNER_SYSTEM_PROMPT, TestPlanner, extract_json_from_markdown, planning_prompt};

use crate::confirmation::ConfirmationPolicy;
use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::turn::ToolCall;
use args::{
    EndpointDetailsArgs, ExecuteTestArgs, ExecuteTestGroupArgs, ExportTestsArgs,
    GenerateReportArgs, GenerateTestPlanArgs,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// The tools known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Run one HTTP test.
    ExecuteTest,
    /// Run a batch of tests after plan selection.
    ExecuteTestGroup,
    /// Ask the planner for test cases.
    GenerateTestPlan,
    /// Write a report file.
    GenerateReport,
    /// Export tests to other formats.
    ExportTests,
    /// Describe project endpoints.
    EndpointDetails,
}

impl ToolKind {
    /// All tools, in the order they are advertised.
    pub const ALL: [Self; 6] = [
        Self::GenerateTestPlan,
        Self::ExecuteTestGroup,
        Self::ExecuteTest,
        Self::EndpointDetails,
        Self::GenerateReport,
        Self::ExportTests,
    ];

    /// Wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ExecuteTest => "ExecuteTest",
            Self::ExecuteTestGroup => "ExecuteTestGroup",
            Self::GenerateTestPlan => "GenerateTestPlan",
            Self::GenerateReport => "GenerateReport",
            Self::ExportTests => "ExportTests",
            Self::EndpointDetails => "get_endpoints_details",
        }
    }

    /// Look a tool up by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether calls pause for the user.
    #[must_use]
    pub const fn policy(self) -> ConfirmationPolicy {
        match self {
            Self::GenerateTestPlan | Self::ExecuteTestGroup | Self::GenerateReport => {
                ConfirmationPolicy::Auto
            }
            Self::ExecuteTest | Self::ExportTests | Self::EndpointDetails => {
                ConfirmationPolicy::Confirm
            }
        }
    }

    /// Heading used when a stored call is shown again.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::EndpointDetails => "Getting endpoint details",
            Self::GenerateTestPlan => "Generated test cases",
            Self::ExecuteTestGroup => "Executing tests",
            Self::GenerateReport => "Generating PDF report",
            Self::ExecuteTest => "Executing test",
            Self::ExportTests => "Exporting tests",
        }
    }

    const fn description(self) -> &'static str {
        match self {
            Self::ExecuteTest => {
                "Execute a single HTTP request against the API and compare the status code with expected_status (default 200)."
            }
            Self::ExecuteTestGroup => {
                "Execute a group of tests sequentially. The user selects which tests run before execution starts."
            }
            Self::GenerateTestPlan => {
                "Generate up to 10 test cases for the given endpoints and focus. Call get_endpoints_details first for accurate tests."
            }
            Self::GenerateReport => {
                "Write a test report from Markdown content and return the file path."
            }
            Self::ExportTests => {
                "Export the last executed tests (or the last test plan) to postman, curl, sh or pytest files."
            }
            Self::EndpointDetails => {
                "Get parameters, request body and responses of specific endpoints of the current project."
            }
        }
    }

    fn schema(self) -> Value {
        match self {
            Self::ExecuteTest => schema_of::<ExecuteTestArgs>(),
            Self::ExecuteTestGroup => schema_of::<ExecuteTestGroupArgs>(),
            Self::GenerateTestPlan => schema_of::<GenerateTestPlanArgs>(),
            Self::GenerateReport => schema_of::<GenerateReportArgs>(),
            Self::ExportTests => schema_of::<ExportTestsArgs>(),
            Self::EndpointDetails => schema_of::<EndpointDetailsArgs>(),
        }
    }

    /// Full spec of this tool.
    #[must_use]
    pub fn spec(self) -> ToolSpec {
        ToolSpec {
            kind: self,
            name: self.name(),
            description: self.description(),
            schema: self.schema(),
            policy: self.policy(),
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn schema_of<T: JsonSchema>() -> Value {
    let mut schema = schemars::schema_for!(T).to_value();
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    schema
}

/// Name, description, argument schema and policy of one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    /// Which tool.
    pub kind: ToolKind,
    /// Wire name.
    pub name: &'static str,
    /// Description for the model.
    pub description: &'static str,
    /// JSON schema of the arguments.
    pub schema: Value,
    /// Confirmation policy.
    pub policy: ConfirmationPolicy,
}

impl ToolSpec {
    /// The definition sent to the model.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: self.schema.clone(),
        }
    }
}

/// Definitions of every tool, in advertised order.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolKind::ALL
        .into_iter()
        .map(|kind| kind.spec().definition())
        .collect()
}

/// Policy of a call by tool name. Only the registered safe tools skip
/// confirmation; unknown names are confirmed like any other call.
#[must_use]
pub fn policy_for(name: &str) -> ConfirmationPolicy {
    ToolKind::from_name(name).map_or(ConfirmationPolicy::Confirm, ToolKind::policy)
}

/// Decode a call's arguments into `T`.
///
/// # Errors
///
/// Returns [`ToolError::Validation`] when an argument is missing or has the
/// wrong type.
pub fn decode_args<T: DeserializeOwned>(call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_value(call.arguments_value())
        .map_err(|e| ToolError::validation(call.name.clone(), e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new("call_1", name, args.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("rm_rf"), None);
    }

    #[test]
    fn test_safe_tools_are_auto() {
        assert_eq!(policy_for("GenerateTestPlan"), ConfirmationPolicy::Auto);
        assert_eq!(policy_for("ExecuteTestGroup"), ConfirmationPolicy::Auto);
        assert_eq!(policy_for("GenerateReport"), ConfirmationPolicy::Auto);
        assert_eq!(policy_for("ExecuteTest"), ConfirmationPolicy::Confirm);
        assert_eq!(policy_for("ExportTests"), ConfirmationPolicy::Confirm);
        assert_eq!(policy_for("DeleteEverything"), ConfirmationPolicy::Confirm);
    }

    #[test]
    fn test_definitions_carry_required_fields() {
        let definitions = tool_definitions();
        assert_eq!(definitions.len(), 6);

        let execute = definitions.iter().find(|d| d.name == "ExecuteTest").unwrap();
        let required = execute.parameters["required"].as_array().unwrap();
        assert!(required.contains(&json!("method")));
        assert!(required.contains(&json!("endpoint")));
        assert!(!required.contains(&json!("expected_status")));
        assert_eq!(execute.parameters["type"], "object");
    }

    #[test]
    fn test_decode_args_validation() {
        let ok: GenerateTestPlanArgs =
            decode_args(&call("GenerateTestPlan", json!({"what": "GET /users"}))).unwrap();
        assert_eq!(ok.focus, "happy path");

        let err = decode_args::<ExecuteTestArgs>(&call("ExecuteTest", json!({"method": "GET"})))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("endpoint"));

        let err = decode_args::<ExecuteTestArgs>(&call(
            "ExecuteTest",
            json!({"method": "GET", "endpoint": "/", "expected_status": "ok"}),
        ))
        .unwrap_err();
        assert!(err.is_validation());
    }
}
