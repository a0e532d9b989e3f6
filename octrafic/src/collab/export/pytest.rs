use super::{ExportRequest, ExportedTest, write_file};
use crate::collab::Exporter;
use crate::config::AuthConfig;
use crate::error::ToolError;
use std::fmt::Write as _;

/// Writes a pytest module using `requests`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PytestExporter;

impl PytestExporter {
    fn function_name(test: &ExportedTest, index: usize) -> String {
        let method = test.method.to_lowercase();
        let endpoint: String = test
            .endpoint
            .replace('/', "_")
            .chars()
            .filter(|c| !matches!(c, '{' | '}'))
            .collect();
        let endpoint = endpoint.trim_matches('_');
        if endpoint.is_empty() {
            format!("test_{method}_{}", index + 1)
        } else {
            format!("test_{method}_{endpoint}")
        }
    }

    fn preamble(script: &mut String, request: &ExportRequest) {
        script.push_str("import requests\nimport pytest\n\n");
        let _ = writeln!(script, "BASE_URL = \"{}\"\n", request.base_url);
        match &request.auth {
            AuthConfig::None => return,
            AuthConfig::Bearer { token } => {
                let _ = writeln!(script, "# Authentication configuration\nAUTH_TOKEN = \"{token}\"");
            }
            AuthConfig::ApiKey {
                key_name,
                key_value,
            } => {
                let _ = writeln!(
                    script,
                    "# Authentication configuration\nAPI_KEY_NAME = \"{key_name}\"\nAPI_KEY_VALUE = \"{key_value}\""
                );
            }
            AuthConfig::Basic { username, password } => {
                let _ = writeln!(
                    script,
                    "# Authentication configuration\nAUTH_USER = \"{username}\"\nAUTH_PASS = \"{password}\""
                );
            }
        }
        script.push('\n');
    }

    fn function(script: &mut String, test: &ExportedTest, index: usize, auth: &AuthConfig) {
        let _ = writeln!(script, "def {}():", Self::function_name(test, index));
        let _ = writeln!(script, "    \"\"\"{} {}\"\"\"", test.method, test.endpoint);
        let _ = writeln!(script, "    url = BASE_URL + \"{}\"", test.endpoint);

        script.push_str("    headers = {\"Content-Type\": \"application/json\"");
        for (name, value) in &test.headers {
            let _ = write!(script, ", \"{name}\": \"{value}\"");
        }
        script.push_str("}\n");

        if test.requires_auth {
            match auth {
                AuthConfig::Bearer { .. } => {
                    script.push_str("    headers[\"Authorization\"] = f\"Bearer {AUTH_TOKEN}\"\n");
                }
                AuthConfig::ApiKey { .. } => {
                    script.push_str("    headers[API_KEY_NAME] = API_KEY_VALUE\n");
                }
                AuthConfig::None | AuthConfig::Basic { .. } => {}
            }
        }
        if test.requires_auth && matches!(auth, AuthConfig::Basic { .. }) {
            script.push_str("    auth = (AUTH_USER, AUTH_PASS)\n");
        } else {
            script.push_str("    auth = None\n");
        }

        let method = test.method.to_lowercase();
        if let Some(body) = test.body_text() {
            let _ = writeln!(script, "    data = \"\"\"{}\"\"\"", body.replace('"', "\\\""));
            let _ = writeln!(
                script,
                "    response = requests.{method}(url, headers=headers, data=data, auth=auth)"
            );
        } else {
            let _ = writeln!(script, "    response = requests.{method}(url, headers=headers, auth=auth)");
        }
        script.push('\n');

        if test.status_code > 0 {
            let _ = writeln!(script, "    assert response.status_code == {}", test.status_code);
        } else {
            script.push_str("    assert response.status_code < 500\n");
        }
        if let Some(error) = &test.error {
            let _ = writeln!(script, "    # Note: Test failed with error: {error}");
        }
        script.push_str("\n\n");
    }
}

impl Exporter for PytestExporter {
    fn file_extension(&self) -> &'static str {
        ".py"
    }

    fn export(&self, request: &ExportRequest) -> Result<(), ToolError> {
        let mut script = String::new();
        Self::preamble(&mut script, request);
        for (i, test) in request.tests.iter().enumerate() {
            Self::function(&mut script, test, i, &request.auth);
        }
        write_file(&request.file_path, &script)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::tests::sample_request;
    use super::*;
    use crate::collab::TestSpec;

    #[test]
    fn test_function_names() {
        let users = ExportedTest::from(&TestSpec::new("GET", "/users/{id}"));
        assert_eq!(PytestExporter::function_name(&users, 0), "test_get_users_id");
        let root = ExportedTest::from(&TestSpec::new("GET", "/"));
        assert_eq!(PytestExporter::function_name(&root, 2), "test_get_3");
    }

    #[test]
    fn test_module_contents() {
        let dir = tempfile::tempdir().unwrap();
        let request = sample_request(dir.path(), "test_api.py");
        PytestExporter.export(&request).unwrap();

        let module = std::fs::read_to_string(&request.file_path).unwrap();
        assert!(module.starts_with("import requests\nimport pytest\n"));
        assert!(module.contains("AUTH_TOKEN = \"tok\""));
        assert!(module.contains("def test_get_health():"));
        assert!(module.contains("assert response.status_code < 500"));
        assert!(module.contains("assert response.status_code == 201"));
        assert!(module.contains("headers[\"Authorization\"] = f\"Bearer {AUTH_TOKEN}\""));
    }
}
