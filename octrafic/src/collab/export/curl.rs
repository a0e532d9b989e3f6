use super::{ExportRequest, ExportedTest, auth_headers, write_file};
use crate::collab::Exporter;
use crate::config::AuthConfig;
use crate::error::ToolError;
use std::fmt::Write as _;

/// Writes a bash script with one `curl` command per test.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurlExporter;

impl CurlExporter {
    fn command(test: &ExportedTest, auth: &AuthConfig) -> String {
        let mut parts = vec![
            "curl".to_string(),
            format!("-X {}", test.method),
            "-H 'Content-Type: application/json'".to_string(),
        ];
        for (name, value) in &test.headers {
            parts.push(format!("-H '{name}: {value}'"));
        }
        for (name, value) in auth_headers(test, auth) {
            parts.push(format!("-H '{name}: {value}'"));
        }
        if test.requires_auth
            && let AuthConfig::Basic { username, password } = auth
        {
            parts.push(format!("-u '{username}:{password}'"));
        }
        if let Some(body) = test.body_text() {
            parts.push(format!("-d '{}'", body.replace('\'', "'\\''")));
        }
        parts.push(format!("\"${{BASE_URL}}{}\"", test.endpoint));
        parts.join(" \\\n  ")
    }
}

impl Exporter for CurlExporter {
    fn file_extension(&self) -> &'static str {
        ".sh"
    }

    fn export(&self, request: &ExportRequest) -> Result<(), ToolError> {
        let mut script = String::from("#!/bin/bash\n\n");
        let _ = writeln!(script, "# Generated curl commands for {}", request.base_url);
        let _ = writeln!(script, "BASE_URL=\"{}\"\n", request.base_url);

        for (i, test) in request.tests.iter().enumerate() {
            if i > 0 {
                script.push('\n');
            }
            let _ = writeln!(script, "# Test {}: {} {}", i + 1, test.method, test.endpoint);
            script.push_str(&Self::command(test, &request.auth));
            script.push('\n');
        }

        write_file(&request.file_path, &script)?;
        set_executable(&request.file_path);
        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)) {
        tracing::warn!(path = %path.display(), error = %e, "could not mark script executable");
    }
}

#[cfg(not(unix))]
const fn set_executable(_path: &std::path::Path) {}
