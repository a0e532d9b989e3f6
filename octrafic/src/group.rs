//! Sequential execution of test batches.
//!
//! Tests of a group run strictly one after another so transcript output is
//! deterministic and the API under test never sees more than one request
//! from a session at a time.

use crate::collab::{ExportedTest, HttpOutcome, TestExecutor, TestSpec};
use crate::error::ToolError;
use crate::transcript::{TranscriptLine, preview};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Characters of response body shown under a single test.
pub const RESPONSE_PREVIEW_CHARS: usize = 200;

/// Result of one executed test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub endpoint: String,
    /// Status the test expected.
    pub expected_status: u16,
    /// Observed status; `None` on transport failure.
    pub status_code: Option<u16>,
    /// Response body.
    pub response_body: String,
    /// Request duration.
    pub duration_ms: u64,
    /// `status_code == expected_status`.
    pub passed: bool,
    /// Whether credentials were sent.
    pub requires_auth: bool,
    /// Transport error.
    pub error: Option<String>,
}

impl TestResult {
    /// Combine a spec with what the executor returned.
    #[must_use]
    pub fn from_outcome(spec: &TestSpec, outcome: Result<HttpOutcome, ToolError>) -> Self {
        let expected_status = spec.expected_status();
        let mut result = Self {
            method: spec.method.clone(),
            endpoint: spec.endpoint.clone(),
            expected_status,
            status_code: None,
            response_body: String::new(),
            duration_ms: 0,
            passed: false,
            requires_auth: spec.requires_auth,
            error: None,
        };
        match outcome {
            Ok(outcome) => {
                result.passed = outcome.status_code == expected_status;
                result.status_code = Some(outcome.status_code);
                result.duration_ms = outcome.duration_ms();
                result.response_body = outcome.body;
            }
            Err(e) => result.error = Some(e.to_string()),
        }
        result
    }

    /// Tool response of a single `ExecuteTest`.
    #[must_use]
    pub fn to_single_response(&self) -> Value {
        match (&self.error, self.status_code) {
            (None, Some(status_code)) => json!({
                "method": self.method,
                "endpoint": self.endpoint,
                "status_code": status_code,
                "expected_status": self.expected_status,
                "response_body": self.response_body,
                "duration_ms": self.duration_ms,
                "passed": self.passed,
            }),
            (error, _) => json!({
                "method": self.method,
                "endpoint": self.endpoint,
                "error": error.as_deref().unwrap_or("no response"),
                "expected_status": self.expected_status,
                "passed": false,
            }),
        }
    }

    /// Item of an `ExecuteTestGroup` response.
    #[must_use]
    pub fn to_group_item(&self) -> Value {
        match (&self.error, self.status_code) {
            (None, Some(status_code)) => json!({
                "method": self.method,
                "endpoint": self.endpoint,
                "status_code": status_code,
                "expected_status": self.expected_status,
                "response_body": self.response_body,
                "duration_ms": self.duration_ms,
                "passed": self.passed,
                "requires_auth": self.requires_auth,
            }),
            (error, _) => json!({
                "method": self.method,
                "endpoint": self.endpoint,
                "error": error.as_deref().unwrap_or("no response"),
                "passed": false,
                "requires_auth": self.requires_auth,
            }),
        }
    }

    fn status_line(&self, indent: &str, status_code: u16) -> String {
        let mut line = format!("{indent}Status: {status_code}");
        if !self.passed {
            line.push_str(&format!(" (expected {})", self.expected_status));
        }
        line.push_str(&format!(" | Duration: {}ms", self.duration_ms));
        line
    }

    /// Transcript of a single `ExecuteTest`.
    #[must_use]
    pub fn single_lines(&self) -> Vec<TranscriptLine> {
        let glyph = if self.passed { "✓" } else { "✗" };
        let mut lines = vec![TranscriptLine::outcome(
            self.passed,
            format!("{glyph} {} {}", self.method, self.endpoint),
        )];
        match (&self.error, self.status_code) {
            (None, Some(status_code)) => {
                lines.push(TranscriptLine::detail(self.status_line("   ", status_code)));
                if !self.response_body.is_empty() {
                    lines.push(TranscriptLine::detail(format!(
                        "   Response: {}",
                        preview(&self.response_body, RESPONSE_PREVIEW_CHARS)
                    )));
                }
            }
            (error, _) => lines.push(TranscriptLine::detail(format!(
                "   Error: {}",
                error.as_deref().unwrap_or("no response")
            ))),
        }
        lines
    }

    /// Transcript of one test inside a group.
    #[must_use]
    pub fn group_lines(&self) -> Vec<TranscriptLine> {
        let glyph = if self.passed { "✓" } else { "✗" };
        let auth = if self.requires_auth { " • Auth" } else { "" };
        let mut lines = vec![TranscriptLine::outcome(
            self.passed,
            format!("  {glyph} {} {}{auth}", self.method, self.endpoint),
        )];
        match (&self.error, self.status_code) {
            (None, Some(status_code)) => {
                lines.push(TranscriptLine::detail(self.status_line("    ", status_code)));
            }
            (error, _) => lines.push(TranscriptLine::detail(format!(
                "    Error: {}",
                error.as_deref().unwrap_or("no response")
            ))),
        }
        lines
    }

    /// The result as an export row.
    #[must_use]
    pub fn to_exported(&self, spec: Option<&TestSpec>) -> ExportedTest {
        ExportedTest {
            method: self.method.clone(),
            endpoint: self.endpoint.clone(),
            headers: spec.map(|s| s.headers.clone()).unwrap_or_default(),
            body: spec.and_then(|s| s.body.clone()),
            status_code: self.status_code.unwrap_or(0),
            response_body: self.response_body.clone(),
            duration_ms: self.duration_ms,
            requires_auth: self.requires_auth,
            error: self.error.clone(),
        }
    }
}

/// Headline shown when a group starts.
#[must_use]
pub fn group_label(tests: &[TestSpec]) -> String {
    match tests {
        [] => "Running tests".to_string(),
        [only] => format!("Testing {} {}", only.method, only.endpoint),
        many => format!("Testing {} endpoints", many.len()),
    }
}

/// Aggregate of a finished (or cancelled) group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupReport {
    /// Tests that ran, paired with their results, in order.
    pub entries: Vec<(TestSpec, TestResult)>,
    /// Set when the user cancelled before every test ran.
    pub cancelled: bool,
}

impl GroupReport {
    /// Tests that ran.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Tests that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|(_, r)| !r.passed).count()
    }

    /// Results in order.
    pub fn results(&self) -> impl Iterator<Item = &TestResult> {
        self.entries.iter().map(|(_, r)| r)
    }

    /// `{count, results}`.
    #[must_use]
    pub fn to_response(&self) -> Value {
        let results: Vec<Value> = self.results().map(TestResult::to_group_item).collect();
        json!({
            "count": self.count(),
            "results": results,
        })
    }

    /// Closing transcript line.
    #[must_use]
    pub fn summary_line(&self) -> TranscriptLine {
        let failed = self.failed();
        if failed == 0 {
            TranscriptLine::outcome(true, format!("✓ All {} tests passed", self.count()))
        } else {
            TranscriptLine::outcome(false, format!("✗ {failed}/{} tests failed", self.count()))
        }
    }

    /// Rows for exporters.
    #[must_use]
    pub fn exported(&self) -> Vec<ExportedTest> {
        self.entries
            .iter()
            .map(|(spec, result)| result.to_exported(Some(spec)))
            .collect()
    }
}

/// Runs test groups one request at a time.
#[derive(Clone)]
pub struct TestGroupRunner {
    executor: Arc<dyn TestExecutor>,
}

impl std::fmt::Debug for TestGroupRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestGroupRunner").finish_non_exhaustive()
    }
}

impl TestGroupRunner {
    /// Runner over `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn TestExecutor>) -> Self {
        Self { executor }
    }

    /// Run `tests` in order. `on_result` sees every result as soon as it is
    /// known. A cancel stops before the next test; the request in flight is
    /// abandoned and not reported.
    pub async fn run(
        &self,
        tests: &[TestSpec],
        cancel: &CancellationToken,
        mut on_result: impl FnMut(&TestResult) + Send,
    ) -> GroupReport {
        let mut report = GroupReport {
            entries: Vec::with_capacity(tests.len()),
            cancelled: false,
        };
        for (index, spec) in tests.iter().enumerate() {
            trace!(index, method = %spec.method, endpoint = %spec.endpoint, "group test");
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(completed = index, total = tests.len(), "test group cancelled");
                    report.cancelled = true;
                    break;
                }
                outcome = self.executor.execute(spec) => outcome,
            };
            let result = TestResult::from_outcome(spec, outcome);
            on_result(&result);
            report.entries.push((spec.clone(), result));
        }
        report
    }
}
