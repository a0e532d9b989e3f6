use super::{HttpOutcome, TestExecutor, TestSpec};
use crate::config::AuthConfig;
use crate::error::ToolError;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use std::time::{Duration, Instant};
use tracing::debug;

/// Runs tests against a live API with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTestExecutor {
    client: reqwest::Client,
    base_url: String,
    auth: AuthConfig,
}

impl HttpTestExecutor {
    /// Create an executor for `base_url`.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        auth: AuthConfig,
        timeout_secs: Option<u64>,
    ) -> Result<Self, ToolError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| ToolError::execution(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth,
        })
    }

    /// Full URL for a path.
    #[must_use]
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if endpoint.starts_with('/') {
            format!("{base}{endpoint}")
        } else {
            format!("{base}/{endpoint}")
        }
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            AuthConfig::None => request,
            AuthConfig::Bearer { token } => request.bearer_auth(token),
            AuthConfig::ApiKey {
                key_name,
                key_value,
            } => request.header(key_name.as_str(), key_value.as_str()),
            AuthConfig::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }
}

#[async_trait]
impl TestExecutor for HttpTestExecutor {
    async fn execute(&self, test: &TestSpec) -> Result<HttpOutcome, ToolError> {
        let method = Method::from_bytes(test.method.to_uppercase().as_bytes())
            .map_err(|_| ToolError::execution(format!("invalid HTTP method: {}", test.method)))?;
        let url = self.url_for(&test.endpoint);

        let mut request = self.client.request(method, &url);
        for (name, value) in &test.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &test.body {
            request = match body {
                serde_json::Value::String(raw) => {
                    request.header(CONTENT_TYPE, "application/json").body(raw.clone())
                }
                other => request.json(other),
            };
        }
        if test.requires_auth {
            request = self.with_auth(request);
        }

        debug!(method = %test.method, url = %url, requires_auth = test.requires_auth, "executing test");
        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("request failed: {e}")))?;
        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::execution(format!("failed to read response body: {e}")))?;

        Ok(HttpOutcome {
            status_code,
            body,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let executor = HttpTestExecutor::new("http://localhost:3000/", AuthConfig::None, None).unwrap();
        assert_eq!(executor.url_for("/users"), "http://localhost:3000/users");
        assert_eq!(executor.url_for("users"), "http://localhost:3000/users");
        assert_eq!(executor.url_for("https://other/x"), "https://other/x");
    }

    #[tokio::test]
    async fn test_invalid_method_is_execution_error() {
        let executor = HttpTestExecutor::new("http://localhost:1", AuthConfig::None, None).unwrap();
        let err = executor
            .execute(&TestSpec::new("BAD METHOD", "/"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid HTTP method"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let executor = HttpTestExecutor::new("http://127.0.0.1:1", AuthConfig::None, Some(2)).unwrap();
        let err = executor.execute(&TestSpec::new("GET", "/ping")).await.unwrap_err();
        assert!(err.to_string().starts_with("request failed"));
    }
}
