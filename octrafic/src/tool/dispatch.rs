use super::args::{
    EndpointDetailsArgs, ExecuteTestArgs, ExecuteTestGroupArgs, ExportTestsArgs,
    GenerateReportArgs, GenerateTestPlanArgs,
};
use super::{TestPlanner, ToolKind, decode_args};
use crate::collab::{
    EndpointRepository, ExportRequest, ExportedTest, ExporterRegistry, ReportGenerator,
    TestExecutor, TestSpec, format_label, resolve_export_path,
};
use crate::config::AuthConfig;
use crate::error::ToolError;
use crate::group::{GroupReport, TestGroupRunner, TestResult};
use crate::llm::Usage;
use crate::transcript::TranscriptLine;
use crate::turn::ToolCall;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// External capabilities the tools drive.
#[derive(Clone)]
pub struct Collaborators {
    /// Sends HTTP tests.
    pub executor: Arc<dyn TestExecutor>,
    /// Writes reports.
    pub reports: Arc<dyn ReportGenerator>,
    /// Export formats.
    pub exporters: ExporterRegistry,
    /// Endpoint lookups.
    pub endpoints: Arc<dyn EndpointRepository>,
    /// Test planning.
    pub planner: TestPlanner,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("exporters", &self.exporters)
            .field("planner", &self.planner)
            .finish_non_exhaustive()
    }
}

/// Session data a tool call may read. A snapshot, so dispatch can run on
/// its own task without touching the live session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchContext {
    /// Project whose endpoints are looked up.
    pub project_id: String,
    /// Base URL of the API under test.
    pub base_url: String,
    /// Project credentials, passed to exporters.
    pub auth: AuthConfig,
    /// Tests `ExportTests` writes: the last group results, else the last plan.
    pub export_source: Vec<ExportedTest>,
    /// Directory relative export paths resolve against.
    pub working_dir: PathBuf,
}

/// Everything one dispatch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Payload of the tool response.
    pub response: Value,
    /// Transcript produced while running.
    pub lines: Vec<TranscriptLine>,
    /// A freshly generated plan.
    pub plan: Option<Vec<TestSpec>>,
    /// Results of executed tests, in order.
    pub tests: Vec<TestResult>,
    /// Tokens spent by the tool itself.
    pub usage: Option<Usage>,
    /// Set when the response is `{"error": ...}`.
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(response: Value, lines: Vec<TranscriptLine>) -> Self {
        Self {
            response,
            lines,
            plan: None,
            tests: Vec::new(),
            usage: None,
            is_error: false,
        }
    }

    /// An `{"error": ...}` response with an `Error: ...` line.
    #[must_use]
    pub fn error(error: &ToolError) -> Self {
        let message = error.to_string();
        Self {
            is_error: true,
            ..Self::ok(
                json!({ "error": message }),
                vec![TranscriptLine::error(format!("Error: {message}"))],
            )
        }
    }
}

/// Validates tool calls and runs their handlers.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    collab: Collaborators,
    runner: TestGroupRunner,
}

impl ToolDispatcher {
    /// Dispatcher over `collab`.
    #[must_use]
    pub fn new(collab: Collaborators) -> Self {
        let runner = TestGroupRunner::new(Arc::clone(&collab.executor));
        Self { collab, runner }
    }

    /// Run one call. Failures become `{"error": ...}` outcomes, never `Err`.
    ///
    /// `ExecuteTestGroup` is refused: groups go through plan selection in the
    /// controller, see [`group_tests`](Self::group_tests) and
    /// [`run_group`](Self::run_group).
    pub async fn dispatch(&self, call: &ToolCall, ctx: &DispatchContext) -> ToolOutcome {
        debug!(tool = %call.name, id = %call.id, "dispatching tool call");
        let result = match ToolKind::from_name(&call.name) {
            None => Err(ToolError::NotFound(call.name.clone())),
            Some(ToolKind::ExecuteTest) => self.execute_test(call).await,
            Some(ToolKind::ExecuteTestGroup) => Err(ToolError::Unavailable(
                ToolKind::ExecuteTestGroup.name(),
            )),
            Some(ToolKind::GenerateTestPlan) => self.generate_plan(call).await,
            Some(ToolKind::GenerateReport) => self.generate_report(call).await,
            Some(ToolKind::ExportTests) => self.export_tests(call, ctx),
            Some(ToolKind::EndpointDetails) => self.endpoint_details(call, ctx).await,
        };
        result.unwrap_or_else(|e| {
            if e.is_validation() {
                debug!(tool = %call.name, id = %call.id, error = %e, "tool arguments rejected");
            } else {
                warn!(tool = %call.name, id = %call.id, error = %e, "tool call failed");
            }
            ToolOutcome::error(&e)
        })
    }

    /// Decode the tests of an `ExecuteTestGroup` call.
    ///
    /// # Errors
    ///
    /// Fails on malformed arguments or an empty list.
    pub fn group_tests(call: &ToolCall) -> Result<Vec<TestSpec>, ToolError> {
        let args: ExecuteTestGroupArgs = decode_args(call)?;
        if args.tests.is_empty() {
            return Err(ToolError::execution("no valid tests to execute"));
        }
        Ok(args.tests)
    }

    /// Run a selected group through the sequential runner.
    pub async fn run_group(
        &self,
        tests: &[TestSpec],
        cancel: &CancellationToken,
        on_result: impl FnMut(&TestResult) + Send,
    ) -> GroupReport {
        self.runner.run(tests, cancel, on_result).await
    }

    async fn execute_test(&self, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let spec: TestSpec = decode_args::<ExecuteTestArgs>(call)?.into();
        let outcome = self.collab.executor.execute(&spec).await;
        let result = TestResult::from_outcome(&spec, outcome);
        Ok(ToolOutcome {
            tests: vec![result.clone()],
            ..ToolOutcome::ok(result.to_single_response(), result.single_lines())
        })
    }

    async fn generate_plan(&self, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let args: GenerateTestPlanArgs = decode_args(call)?;
        let (tests, usage) = self.collab.planner.plan(&args.what, &args.focus).await?;

        let lines = if tests.is_empty() {
            vec![TranscriptLine::warning("⚠️  No tests generated")]
        } else {
            let mut endpoints: Vec<String> = Vec::new();
            for label in tests.iter().map(TestSpec::label) {
                if !endpoints.contains(&label) {
                    endpoints.push(label);
                }
            }
            vec![
                TranscriptLine::tool(format!("Generated {} test cases", tests.len())),
                TranscriptLine::detail(format!("Testing: {}", endpoints.join(", "))),
            ]
        };
        let response = json!({
            "status": "tests_generated",
            "test_count": tests.len(),
            "test_cases": tests,
        });
        Ok(ToolOutcome {
            plan: Some(tests),
            usage: Some(usage),
            ..ToolOutcome::ok(response, lines)
        })
    }

    async fn generate_report(&self, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let args: GenerateReportArgs = decode_args(call)?;
        if args.report_content.trim().is_empty() {
            return Err(ToolError::validation(
                call.name.clone(),
                "missing required parameter: report_content",
            ));
        }
        let path = self
            .collab
            .reports
            .generate(&args.report_content, args.file_name.as_deref())
            .await?;
        let file_path = path.display().to_string();
        Ok(ToolOutcome::ok(
            json!({ "status": "success", "file_path": file_path }),
            vec![
                TranscriptLine::outcome(true, "✓ Report generated"),
                TranscriptLine::detail(format!("   {file_path}")),
            ],
        ))
    }

    fn export_tests(&self, call: &ToolCall, ctx: &DispatchContext) -> Result<ToolOutcome, ToolError> {
        let args: ExportTestsArgs = decode_args(call)?;
        if args.exports.is_empty() {
            return Err(ToolError::validation(
                call.name.clone(),
                "'exports' array cannot be empty",
            ));
        }
        if ctx.export_source.is_empty() {
            return Err(ToolError::execution(
                "no tests available to export. Generate test plan first using GenerateTestPlan",
            ));
        }

        let mut exports = Vec::with_capacity(args.exports.len());
        let mut details = Vec::with_capacity(args.exports.len());
        for target in args.exports {
            if target.format.is_empty() || target.filepath.is_empty() {
                continue;
            }
            let file_path = resolve_export_path(&target.filepath, &ctx.working_dir);
            let request = ExportRequest {
                base_url: ctx.base_url.clone(),
                tests: ctx.export_source.clone(),
                file_path: file_path.clone(),
                auth: ctx.auth.clone(),
            };
            self.collab
                .exporters
                .export(&target.format, &request)
                .map_err(|e| ToolError::execution(format!("export to {} failed: {e}", target.format)))?;

            let file_path = file_path.display().to_string();
            details.push(TranscriptLine::detail(format!(
                "   • {}: {file_path}",
                format_label(&target.format)
            )));
            exports.push(json!({ "format": target.format, "filepath": file_path }));
        }

        let test_count = ctx.export_source.len();
        let mut lines = vec![
            TranscriptLine::outcome(true, "✓ Tests exported"),
            TranscriptLine::detail(format!("   Tests: {test_count}")),
        ];
        lines.extend(details);
        Ok(ToolOutcome::ok(
            json!({ "success": true, "exports": exports, "test_count": test_count }),
            lines,
        ))
    }

    async fn endpoint_details(
        &self,
        call: &ToolCall,
        ctx: &DispatchContext,
    ) -> Result<ToolOutcome, ToolError> {
        let args: EndpointDetailsArgs = decode_args(call)?;
        let known = self
            .collab
            .endpoints
            .load_endpoints(&ctx.project_id)
            .await
            .map_err(|e| ToolError::execution(format!("failed to load endpoints: {e}")))?;

        let endpoints: Vec<Value> = args
            .endpoints
            .iter()
            .filter_map(|wanted| known.iter().find(|e| e.matches(&wanted.method, &wanted.path)))
            .map(|endpoint| {
                let mut detail = Map::new();
                detail.insert("method".into(), json!(endpoint.method));
                detail.insert("path".into(), json!(endpoint.path));
                detail.insert("description".into(), json!(endpoint.description));
                detail.insert("requires_auth".into(), json!(endpoint.requires_auth));
                detail.insert("auth_type".into(), json!(endpoint.auth_type));
                if !endpoint.parameters.is_empty() {
                    detail.insert("parameters".into(), json!(endpoint.parameters));
                }
                if !endpoint.request_body.is_empty() {
                    detail.insert("request_body".into(), json!(endpoint.request_body));
                }
                if !endpoint.responses.is_empty() {
                    detail.insert("responses".into(), json!(endpoint.responses));
                }
                Value::Object(detail)
            })
            .collect();

        let lines = vec![TranscriptLine::tool(format!(
            "{} ({} of {})",
            ToolKind::EndpointDetails.display_name(),
            endpoints.len(),
            args.endpoints.len()
        ))];
        Ok(ToolOutcome::ok(json!({ "endpoints": endpoints }), lines))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collab::{Endpoint, MarkdownReportGenerator, MemoryEndpointRepository};
    use crate::testing::{RecordingExecutor, ScriptedModel};
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new("call_1", name, args.as_object().cloned().unwrap_or_default())
    }

    fn dispatcher(
        executor: RecordingExecutor,
        model: ScriptedModel,
        reports_dir: &std::path::Path,
    ) -> ToolDispatcher {
        let mut users = Endpoint::new("GET", "/users");
        users.description = "List users".into();
        users.requires_auth = true;
        users.auth_type = "bearer".into();
        ToolDispatcher::new(Collaborators {
            executor: Arc::new(executor),
            reports: Arc::new(MarkdownReportGenerator::new(reports_dir)),
            exporters: ExporterRegistry::default(),
            endpoints: Arc::new(MemoryEndpointRepository::new().with_project("shop", vec![users])),
            planner: TestPlanner::new(Arc::new(model)),
        })
    }

    fn ctx(dir: &std::path::Path) -> DispatchContext {
        DispatchContext {
            project_id: "shop".into(),
            base_url: "http://localhost:3000".into(),
            working_dir: dir.to_path_buf(),
            ..DispatchContext::default()
        }
    }

    #[tokio::test]
    async fn test_execute_test_pass_and_fail() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(
            RecordingExecutor::new().respond("/missing", 404),
            ScriptedModel::new(),
            dir.path(),
        );

        let ok = d
            .dispatch(&call("ExecuteTest", json!({"method": "GET", "endpoint": "/ping"})), &ctx(dir.path()))
            .await;
        assert_eq!(ok.response["passed"], true);
        assert_eq!(ok.response["expected_status"], 200);
        assert_eq!(ok.lines[0].text, "✓ GET /ping");

        let bad = d
            .dispatch(
                &call("ExecuteTest", json!({"method": "GET", "endpoint": "/missing", "expected_status": 200})),
                &ctx(dir.path()),
            )
            .await;
        assert_eq!(bad.response["passed"], false);
        assert_eq!(bad.response["status_code"], 404);
        assert!(!bad.is_error);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(
            RecordingExecutor::new().fail("/down", "connection refused"),
            ScriptedModel::new(),
            dir.path(),
        );
        let outcome = d
            .dispatch(&call("ExecuteTest", json!({"method": "GET", "endpoint": "/down"})), &ctx(dir.path()))
            .await;
        assert_eq!(outcome.response["passed"], false);
        assert_eq!(outcome.response["error"], "connection refused");
        assert!(!outcome.is_error);
    }

    #[tokio::test]
    async fn test_validation_errors_become_responses() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(RecordingExecutor::new(), ScriptedModel::new(), dir.path());

        let outcome = d
            .dispatch(&call("ExecuteTest", json!({"endpoint": "/ping"})), &ctx(dir.path()))
            .await;
        assert!(outcome.is_error);
        assert!(outcome.response["error"].as_str().unwrap().contains("method"));

        let unknown = d.dispatch(&call("DropTables", json!({})), &ctx(dir.path())).await;
        assert_eq!(unknown.response["error"], "unknown tool: DropTables");
    }

    #[tokio::test]
    async fn test_generate_plan() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new().then_text([
            r#"{"tests":[{"method":"GET","endpoint":"/users"},{"method":"GET","endpoint":"/users"},{"method":"POST","endpoint":"/users"}]}"#,
        ]);
        let d = dispatcher(RecordingExecutor::new(), model, dir.path());

        let outcome = d
            .dispatch(&call("GenerateTestPlan", json!({"what": "users"})), &ctx(dir.path()))
            .await;
        assert_eq!(outcome.response["status"], "tests_generated");
        assert_eq!(outcome.response["test_count"], 3);
        assert_eq!(outcome.plan.as_ref().map(Vec::len), Some(3));
        assert_eq!(outcome.lines[0].text, "Generated 3 test cases");
        assert_eq!(outcome.lines[1].text, "Testing: GET /users, POST /users");
    }

    #[tokio::test]
    async fn test_empty_plan_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new().then_text([r#"{"tests":[]}"#]);
        let d = dispatcher(RecordingExecutor::new(), model, dir.path());

        let outcome = d
            .dispatch(&call("GenerateTestPlan", json!({"what": "x", "focus": "all aspects"})), &ctx(dir.path()))
            .await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.response["test_count"], 0);
        assert_eq!(outcome.lines[0].text, "⚠️  No tests generated");
    }

    #[tokio::test]
    async fn test_generate_report() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(RecordingExecutor::new(), ScriptedModel::new(), dir.path());
        let outcome = d
            .dispatch(
                &call("GenerateReport", json!({"report_content": "# Done", "file_name": "r1"})),
                &ctx(dir.path()),
            )
            .await;
        assert_eq!(outcome.response["status"], "success");
        let path = outcome.response["file_path"].as_str().unwrap();
        assert!(path.ends_with("r1.md"));
        assert_eq!(outcome.lines[0].text, "✓ Report generated");
    }

    #[tokio::test]
    async fn test_export_requires_tests_and_targets() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(RecordingExecutor::new(), ScriptedModel::new(), dir.path());

        let empty = d
            .dispatch(&call("ExportTests", json!({"exports": []})), &ctx(dir.path()))
            .await;
        assert!(empty.response["error"].as_str().unwrap().contains("'exports' array cannot be empty"));

        let nothing = d
            .dispatch(
                &call("ExportTests", json!({"exports": [{"format": "sh", "filepath": "t.sh"}]})),
                &ctx(dir.path()),
            )
            .await;
        assert_eq!(
            nothing.response["error"],
            "no tests available to export. Generate test plan first using GenerateTestPlan"
        );
    }

    #[tokio::test]
    async fn test_export_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(RecordingExecutor::new(), ScriptedModel::new(), dir.path());
        let mut context = ctx(dir.path());
        context.export_source = vec![ExportedTest::from(&TestSpec::new("GET", "/users"))];

        let outcome = d
            .dispatch(
                &call(
                    "ExportTests",
                    json!({"exports": [
                        {"format": "postman", "filepath": "out/c.json"},
                        {"format": "pytest", "filepath": "out/test_api.py"}
                    ]}),
                ),
                &context,
            )
            .await;
        assert_eq!(outcome.response["success"], true);
        assert_eq!(outcome.response["test_count"], 1);
        assert!(dir.path().join("out/c.json").exists());
        assert!(dir.path().join("out/test_api.py").exists());
        assert_eq!(outcome.lines[2].text, format!("   • Postman Collection: {}", dir.path().join("out/c.json").display()));

        let unknown = d
            .dispatch(
                &call("ExportTests", json!({"exports": [{"format": "har", "filepath": "x.har"}]})),
                &context,
            )
            .await;
        assert_eq!(
            unknown.response["error"],
            "export to har failed: unsupported export format: har"
        );
    }

    #[tokio::test]
    async fn test_endpoint_details_omits_unknown_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(RecordingExecutor::new(), ScriptedModel::new(), dir.path());
        let outcome = d
            .dispatch(
                &call(
                    "get_endpoints_details",
                    json!({"endpoints": [{"method": "GET", "path": "/users"}, {"method": "DELETE", "path": "/users"}]}),
                ),
                &ctx(dir.path()),
            )
            .await;
        let endpoints = outcome.response["endpoints"].as_array().unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0]["description"], "List users");
        assert_eq!(endpoints[0]["auth_type"], "bearer");
        assert!(endpoints[0].get("parameters").is_none());
    }

    #[tokio::test]
    async fn test_group_dispatch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(RecordingExecutor::new(), ScriptedModel::new(), dir.path());
        let outcome = d
            .dispatch(
                &call(
                    "ExecuteTestGroup",
                    json!({"tests": [{"method": "GET", "endpoint": "/a"}]}),
                ),
                &ctx(dir.path()),
            )
            .await;
        assert!(outcome.is_error);
        assert_eq!(
            outcome.response["error"],
            "ExecuteTestGroup must run through the session controller"
        );
        assert!(outcome.tests.is_empty());
    }

    #[test]
    fn test_group_tests_rejects_empty_list() {
        let err = ToolDispatcher::group_tests(&call("ExecuteTestGroup", json!({"tests": []})))
            .unwrap_err();
        assert_eq!(err.to_string(), "no valid tests to execute");
    }

    #[tokio::test]
    async fn test_run_group_counts_every_test() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(
            RecordingExecutor::new().respond("/b", 500),
            ScriptedModel::new(),
            dir.path(),
        );
        let tests = ToolDispatcher::group_tests(&call(
            "ExecuteTestGroup",
            json!({"tests": [{"method": "GET", "endpoint": "/a"}, {"method": "GET", "endpoint": "/b", "requires_auth": true}]}),
        ))
        .unwrap();
        let mut seen = 0;
        let report = d.run_group(&tests, &CancellationToken::new(), |_| seen += 1).await;
        assert_eq!(report.count(), 2);
        assert_eq!(seen, 2);
        assert_eq!(report.summary_line().text, "✗ 1/2 tests failed");
    }
}
