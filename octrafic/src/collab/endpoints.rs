use super::{Endpoint, EndpointRepository};
use crate::config::ProjectPaths;
use crate::error::ToolError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

/// Reads `<data dir>/projects/<id>/endpoints.json`.
#[derive(Debug, Clone)]
pub struct JsonEndpointRepository {
    data_dir: PathBuf,
}

impl JsonEndpointRepository {
    /// Repository rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl EndpointRepository for JsonEndpointRepository {
    async fn load_endpoints(&self, project_id: &str) -> Result<Vec<Endpoint>, ToolError> {
        let path = ProjectPaths::new(&self.data_dir, project_id).endpoints_file();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no endpoints file");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(ToolError::execution(format!(
                    "failed to read endpoints from {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content)
            .map_err(|e| ToolError::execution(format!("failed to parse endpoints: {e}")))
    }
}

/// Endpoints held in memory, keyed by project.
#[derive(Debug, Default)]
pub struct MemoryEndpointRepository {
    projects: RwLock<HashMap<String, Vec<Endpoint>>>,
}

impl MemoryEndpointRepository {
    /// An empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the endpoints of a project.
    #[must_use]
    pub fn with_project(self, project_id: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        if let Ok(mut projects) = self.projects.write() {
            projects.insert(project_id.into(), endpoints);
        }
        self
    }
}

#[async_trait]
impl EndpointRepository for MemoryEndpointRepository {
    async fn load_endpoints(&self, project_id: &str) -> Result<Vec<Endpoint>, ToolError> {
        let projects = self
            .projects
            .read()
            .map_err(|_| ToolError::execution("endpoint repository lock poisoned"))?;
        Ok(projects.get(project_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_repository_reads_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path(), "shop");
        std::fs::create_dir_all(paths.root()).unwrap();
        std::fs::write(
            paths.endpoints_file(),
            r#"[{"method":"GET","path":"/users","description":"List users","requires_auth":true,"auth_type":"bearer"}]"#,
        )
        .unwrap();

        let endpoints = JsonEndpointRepository::new(dir.path())
            .load_endpoints("shop")
            .await
            .unwrap();
        assert_eq!(endpoints.len(), 1);
        assert!(endpoints[0].matches("GET", "/users"));
        assert!(endpoints[0].requires_auth);
    }

    #[tokio::test]
    async fn test_json_repository_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let endpoints = JsonEndpointRepository::new(dir.path())
            .load_endpoints("nope")
            .await
            .unwrap();
        assert!(endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_json_repository_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path(), "bad");
        std::fs::create_dir_all(paths.root()).unwrap();
        std::fs::write(paths.endpoints_file(), "{not json").unwrap();

        let err = JsonEndpointRepository::new(dir.path())
            .load_endpoints("bad")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to parse endpoints"));
    }

    #[tokio::test]
    async fn test_memory_repository() {
        let repo = MemoryEndpointRepository::new()
            .with_project("p", vec![Endpoint::new("POST", "/orders")]);
        assert_eq!(repo.load_endpoints("p").await.unwrap().len(), 1);
        assert!(repo.load_endpoints("q").await.unwrap().is_empty());
    }
}
