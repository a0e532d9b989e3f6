//! Typed tool arguments. Each struct doubles as the JSON schema advertised
//! to the model.

use crate::collab::TestSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_focus() -> String {
    "happy path".to_string()
}

/// `ExecuteTest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteTestArgs {
    /// HTTP method, e.g. GET.
    pub method: String,
    /// Path relative to the API base URL.
    pub endpoint: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON request body.
    #[serde(default)]
    pub body: Option<Value>,
    /// Whether to send the project's credentials.
    #[serde(default)]
    pub requires_auth: bool,
    /// Status code the test expects (default 200).
    #[serde(default)]
    pub expected_status: Option<u16>,
}

impl From<ExecuteTestArgs> for TestSpec {
    fn from(args: ExecuteTestArgs) -> Self {
        Self {
            method: args.method,
            endpoint: args.endpoint,
            headers: args.headers,
            body: args.body.filter(|b| !b.is_null()),
            requires_auth: args.requires_auth,
            expected_status: args.expected_status,
            description: None,
        }
    }
}

/// `ExecuteTestGroup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteTestGroupArgs {
    /// Tests to run in order.
    pub tests: Vec<TestSpec>,
}

/// `GenerateTestPlan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerateTestPlanArgs {
    /// What to test: endpoints and the behavior of interest.
    pub what: String,
    /// `happy path`, `authentication`, `error handling` or `all aspects`.
    #[serde(default = "default_focus")]
    pub focus: String,
}

/// `GenerateReport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerateReportArgs {
    /// Full report text in Markdown.
    pub report_content: String,
    /// Optional file name without directory.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// One requested export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExportTarget {
    /// `postman`, `curl`, `sh` or `pytest`.
    pub format: String,
    /// Destination path; `~` and relative paths are allowed.
    pub filepath: String,
}

/// `ExportTests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExportTestsArgs {
    /// Exports to write.
    pub exports: Vec<ExportTarget>,
}

/// One endpoint to look up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EndpointRef {
    /// HTTP method.
    pub method: String,
    /// Path template, as listed for the project.
    pub path: String,
}

/// `get_endpoints_details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EndpointDetailsArgs {
    /// Endpoints to describe.
    pub endpoints: Vec<EndpointRef>,
}
