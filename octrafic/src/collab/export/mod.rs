//! Exporting tests to other tools' formats.

mod curl;
mod postman;
mod pytest;

pub use curl::CurlExporter;
pub use postman::PostmanExporter;
pub use pytest::PytestExporter;

use super::{Exporter, TestSpec};
use crate::config::AuthConfig;
use crate::error::ToolError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A test as written by exporters: the planned test plus its last result, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportedTest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub endpoint: String,
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Option<Value>,
    /// Observed status; 0 when never run.
    pub status_code: u16,
    /// Observed response body.
    pub response_body: String,
    /// Observed duration.
    pub duration_ms: u64,
    /// Whether credentials are sent.
    pub requires_auth: bool,
    /// Transport error of the last run.
    pub error: Option<String>,
}

impl ExportedTest {
    /// Body rendered as raw text.
    #[must_use]
    pub fn body_text(&self) -> Option<String> {
        match &self.body {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(raw.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

impl From<&TestSpec> for ExportedTest {
    fn from(spec: &TestSpec) -> Self {
        Self {
            method: spec.method.clone(),
            endpoint: spec.endpoint.clone(),
            headers: spec.headers.clone(),
            body: spec.body.clone(),
            requires_auth: spec.requires_auth,
            ..Self::default()
        }
    }
}

/// Everything an exporter needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    /// Base URL of the API.
    pub base_url: String,
    /// Tests to write.
    pub tests: Vec<ExportedTest>,
    /// Destination file.
    pub file_path: PathBuf,
    /// Project credentials.
    pub auth: AuthConfig,
}

/// Exporters by format name.
#[derive(Clone)]
pub struct ExporterRegistry {
    exporters: HashMap<String, Arc<dyn Exporter>>,
}

impl std::fmt::Debug for ExporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formats: Vec<_> = self.exporters.keys().collect();
        formats.sort();
        f.debug_struct("ExporterRegistry")
            .field("formats", &formats)
            .finish()
    }
}

impl Default for ExporterRegistry {
    /// `postman`, `curl` (also `sh`) and `pytest`.
    fn default() -> Self {
        let curl: Arc<dyn Exporter> = Arc::new(CurlExporter);
        Self::empty()
            .with("postman", Arc::new(PostmanExporter))
            .with("curl", Arc::clone(&curl))
            .with("sh", curl)
            .with("pytest", Arc::new(PytestExporter))
    }
}

impl ExporterRegistry {
    /// A registry with no formats.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            exporters: HashMap::new(),
        }
    }

    /// Register `exporter` under `format`.
    #[must_use]
    pub fn with(mut self, format: impl Into<String>, exporter: Arc<dyn Exporter>) -> Self {
        self.exporters.insert(format.into(), exporter);
        self
    }

    /// Registered format names, sorted.
    #[must_use]
    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.exporters.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }

    /// Export `request` as `format`, creating the destination directory.
    ///
    /// # Errors
    ///
    /// Fails for unknown formats and on I/O errors.
    pub fn export(&self, format: &str, request: &ExportRequest) -> Result<(), ToolError> {
        let exporter = self
            .exporters
            .get(format)
            .ok_or_else(|| ToolError::execution(format!("unsupported export format: {format}")))?;
        if let Some(parent) = request.file_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolError::execution(format!("failed to create directory: {e}")))?;
        }
        exporter.export(request)
    }
}

/// Human label of an export format.
#[must_use]
pub fn format_label(format: &str) -> &str {
    match format {
        "postman" => "Postman Collection",
        "pytest" => "pytest tests",
        "sh" | "curl" => "curl script",
        other => other,
    }
}

/// Expand `~` and make a path absolute against `cwd`.
#[must_use]
pub fn resolve_export_path(raw: &str, cwd: &Path) -> PathBuf {
    let expanded = match raw.strip_prefix("~/") {
        Some(rest) => dirs_next::home_dir().map_or_else(|| PathBuf::from(raw), |home| home.join(rest)),
        None => PathBuf::from(raw),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<(), ToolError> {
    std::fs::write(path, content)
        .map_err(|e| ToolError::execution(format!("failed to write file: {e}")))
}

/// Auth header lines as `(name, value)` pairs for a test; basic auth is
/// handled separately by each format.
pub(crate) fn auth_headers(test: &ExportedTest, auth: &AuthConfig) -> Vec<(String, String)> {
    if !test.requires_auth {
        return Vec::new();
    }
    match auth {
        AuthConfig::Bearer { token } => vec![("Authorization".into(), format!("Bearer {token}"))],
        AuthConfig::ApiKey {
            key_name,
            key_value,
        } => vec![(key_name.clone(), key_value.clone())],
        AuthConfig::None | AuthConfig::Basic { .. } => Vec::new(),
    }
}
