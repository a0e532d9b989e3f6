//! External collaborators consumed by the tool dispatcher.
//!
//! Each capability sits behind a narrow trait so sessions can run against
//! real HTTP and files or against in-memory fakes:
//!
//! - [`TestExecutor`] sends one HTTP test request
//! - [`ReportGenerator`] turns report text into a file
//! - [`Exporter`] writes tests in a foreign format (see [`ExporterRegistry`])
//! - [`EndpointRepository`] knows the endpoints of a project

mod endpoints;
mod export;
mod http;
mod report;

pub use endpoints::{JsonEndpointRepository, MemoryEndpointRepository};
pub use export::{
    CurlExporter, ExportRequest, ExportedTest, ExporterRegistry, PostmanExporter, PytestExporter,
    format_label, resolve_export_path,
};
pub use http::HttpTestExecutor;
pub use report::MarkdownReportGenerator;

use crate::error::ToolError;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Status a test expects when none is given.
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// One HTTP test to run against the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestSpec {
    /// HTTP method, e.g. GET or POST.
    pub method: String,
    /// Path relative to the API base URL, e.g. `/users/1`.
    pub endpoint: String,
    /// Extra request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// JSON request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Whether project credentials are sent.
    #[serde(default)]
    pub requires_auth: bool,
    /// Expected status code (default 200).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
    /// What the test checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TestSpec {
    /// A test with no headers, body or auth.
    #[must_use]
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            headers: BTreeMap::new(),
            body: None,
            requires_auth: false,
            expected_status: None,
            description: None,
        }
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Require authentication.
    #[must_use]
    pub const fn with_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    /// Set the expected status.
    #[must_use]
    pub const fn expecting(mut self, status: u16) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// Expected status with the default applied.
    #[must_use]
    pub fn expected_status(&self) -> u16 {
        self.expected_status.unwrap_or(DEFAULT_EXPECTED_STATUS)
    }

    /// `METHOD endpoint`, as shown in the transcript.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.endpoint)
    }
}

/// What came back from one HTTP test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOutcome {
    /// Response status.
    pub status_code: u16,
    /// Response body as text.
    pub body: String,
    /// Wall time of the request.
    pub duration: Duration,
}

impl HttpOutcome {
    /// Duration in whole milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Sends HTTP tests to the API under test.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Run one test.
    ///
    /// # Errors
    ///
    /// Transport failures (connection refused, invalid URL, ...) are errors;
    /// any HTTP status, including 5xx, is a successful outcome.
    async fn execute(&self, test: &TestSpec) -> Result<HttpOutcome, ToolError>;
}

/// Turns report text into a file.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Write the report and return its path.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    async fn generate(&self, content: &str, file_name: Option<&str>) -> Result<PathBuf, ToolError>;
}

/// Writes tests in a foreign format.
pub trait Exporter: Send + Sync {
    /// Extension of produced files, with the dot.
    fn file_extension(&self) -> &'static str;

    /// Render the request to its file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    fn export(&self, request: &ExportRequest) -> Result<(), ToolError>;
}

/// An endpoint known for a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// HTTP method.
    pub method: String,
    /// Path template.
    pub path: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Whether credentials are required.
    #[serde(default)]
    pub requires_auth: bool,
    /// `bearer`, `apikey`, `basic` or `none`.
    #[serde(default)]
    pub auth_type: String,
    /// Parameter descriptions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Value>,
    /// Request body description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_body: String,
    /// Response descriptions keyed by status.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub responses: BTreeMap<String, Value>,
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if this is the `method path` pair.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.path == path && self.method.eq_ignore_ascii_case(method)
    }
}

/// Knows the endpoints of a project.
#[async_trait]
pub trait EndpointRepository: Send + Sync {
    /// All endpoints of `project_id`.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint list cannot be read.
    async fn load_endpoints(&self, project_id: &str) -> Result<Vec<Endpoint>, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_defaults() {
        let spec: TestSpec = serde_json::from_value(json!({"method": "GET", "endpoint": "/ping"}))
            .unwrap_or_else(|_| TestSpec::new("", ""));
        assert_eq!(spec.expected_status(), 200);
        assert!(!spec.requires_auth);
        assert_eq!(spec.label(), "GET /ping");
    }

    #[test]
    fn test_endpoint_matching() {
        let endpoint = Endpoint::new("GET", "/users");
        assert!(endpoint.matches("get", "/users"));
        assert!(!endpoint.matches("POST", "/users"));
        assert!(!endpoint.matches("GET", "/users/1"));
    }

    #[test]
    fn test_duration_ms() {
        let outcome = HttpOutcome {
            status_code: 200,
            body: String::new(),
            duration: Duration::from_micros(12_900),
        };
        assert_eq!(outcome.duration_ms(), 12);
    }
}
