use super::{ExportRequest, ExportedTest, auth_headers, write_file};
use crate::collab::Exporter;
use crate::error::ToolError;
use serde_json::{Value, json};

const SCHEMA_URL: &str = "https://schema.getpostman.com/json/collection/v2.1.0/collection.json";

/// Writes a Postman v2.1 collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostmanExporter;

impl PostmanExporter {
    /// Build the collection document.
    #[must_use]
    pub fn collection(request: &ExportRequest) -> Value {
        let items: Vec<Value> = request
            .tests
            .iter()
            .map(|test| {
                let mut item = json!({
                    "name": format!("{} {}", test.method, test.endpoint),
                    "request": Self::request(test, request),
                });
                if test.error.is_none() && test.status_code > 0 {
                    item["response"] = json!([Self::response(test)]);
                }
                item
            })
            .collect();

        json!({
            "info": {
                "name": "Octrafic Generated Tests",
                "description": format!("Generated from {}", request.base_url),
                "schema": SCHEMA_URL,
            },
            "item": items,
            "variable": [{"key": "baseUrl", "value": request.base_url, "type": "string"}],
        })
    }

    fn request(test: &ExportedTest, request: &ExportRequest) -> Value {
        let mut headers = vec![json!({"key": "Content-Type", "value": "application/json"})];
        headers.extend(
            test.headers
                .iter()
                .map(|(key, value)| json!({"key": key, "value": value})),
        );
        headers.extend(
            auth_headers(test, &request.auth)
                .into_iter()
                .map(|(key, value)| json!({"key": key, "value": value})),
        );

        let path: Vec<&str> = test.endpoint.trim_start_matches('/').split('/').collect();
        let mut value = json!({
            "method": test.method,
            "header": headers,
            "url": {
                "raw": format!("{{{{baseUrl}}}}{}", test.endpoint),
                "host": ["{{baseUrl}}"],
                "path": path,
            },
        });
        if let Some(body) = test.body_text() {
            value["body"] = json!({
                "mode": "raw",
                "raw": body,
                "options": {"raw": {"language": "json"}},
            });
        }
        value
    }

    fn response(test: &ExportedTest) -> Value {
        json!({
            "name": format!("{} Response", test.status_code),
            "status": test.status_code.to_string(),
            "code": test.status_code,
            "header": [{"key": "Content-Type", "value": "application/json"}],
            "body": test.response_body,
        })
    }
}

impl Exporter for PostmanExporter {
    fn file_extension(&self) -> &'static str {
        ".json"
    }

    fn export(&self, request: &ExportRequest) -> Result<(), ToolError> {
        let data = serde_json::to_string_pretty(&Self::collection(request))
            .map_err(|e| ToolError::execution(format!("failed to marshal collection: {e}")))?;
        write_file(&request.file_path, &data)
    }
}
