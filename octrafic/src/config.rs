//! Configuration: LLM provider settings and per-project context.
//!
//! Provider settings live in `<config dir>/octrafic/config.json` and can be
//! overridden with `OCTRAFIC_`-prefixed environment variables. Project data
//! (API base URL, credentials, endpoints, conversations, reports) lives under
//! `<data dir>/octrafic/projects/<id>/`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of every environment variable read by [`Config::apply_env`].
pub const ENV_PREFIX: &str = "OCTRAFIC_";

/// Providers that run locally and need no API key.
pub const LOCAL_PROVIDERS: &[&str] = &["ollama", "llamacpp"];

const APP_DIR: &str = "octrafic";

/// Environment variable name for a config key, e.g. `api_key` → `OCTRAFIC_API_KEY`.
#[must_use]
pub fn env_var_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.to_uppercase())
}

/// Returns `true` for providers that need no API key.
#[must_use]
pub fn is_local_provider(provider: &str) -> bool {
    LOCAL_PROVIDERS.contains(&provider)
}

/// LLM provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider name (`openai`, `openrouter`, `ollama`, `llamacpp`).
    pub provider: String,
    /// API key; empty for local providers.
    pub api_key: String,
    /// Override of the provider's base URL.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Set once the user completed first-run setup.
    pub onboarded: bool,
    /// Override of the data directory.
    pub data_dir: Option<PathBuf>,
    /// Per-request timeout for model and test calls. `None` waits until
    /// the user cancels.
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: String::new(),
            base_url: String::new(),
            model: "gpt-4o".to_string(),
            onboarded: false,
            data_dir: None,
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Default location of the config file.
    ///
    /// # Errors
    ///
    /// Fails when the platform has no config directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs_next::config_dir()
            .map(|dir| dir.join(APP_DIR).join("config.json"))
            .ok_or(ConfigError::NoDirectory("config"))
    }

    /// Load from `path` (or the default location), then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from a file without environment overrides.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Apply `OCTRAFIC_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup; empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(&env_var_name(key)).filter(|v| !v.is_empty());
        if let Some(provider) = get("provider") {
            self.provider = provider;
        }
        if let Some(api_key) = get("api_key") {
            self.api_key = api_key;
        }
        if let Some(base_url) = get("base_url") {
            self.base_url = base_url;
        }
        if let Some(model) = get("model") {
            self.model = model;
        }
    }

    /// Check that the provider can be reached with these settings.
    ///
    /// # Errors
    ///
    /// Reports a missing API key for remote providers and a missing model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.is_empty() {
            return Err(ConfigError::missing("model"));
        }
        if self.api_key.is_empty() && !is_local_provider(&self.provider) {
            return Err(ConfigError::missing(format!(
                "api_key (set {} or run `octrafic config init`)",
                env_var_name("api_key")
            )));
        }
        Ok(())
    }

    /// Root data directory.
    ///
    /// # Errors
    ///
    /// Fails when no override is set and the platform has no data directory.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs_next::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(ConfigError::NoDirectory("data"))
    }
}

/// Credentials applied to tests that require authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// No credentials.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// Token.
        token: String,
    },
    /// A custom header carrying a key.
    #[serde(rename = "apikey")]
    ApiKey {
        /// Header name.
        key_name: String,
        /// Header value.
        key_value: String,
    },
    /// HTTP basic auth.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl AuthConfig {
    /// Short type name: `none`, `bearer`, `apikey` or `basic`.
    #[must_use]
    pub const fn auth_type(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer { .. } => "bearer",
            Self::ApiKey { .. } => "apikey",
            Self::Basic { .. } => "basic",
        }
    }

    /// Returns `true` when credentials are configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// The API under test and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project id; also the directory name.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Base URL of the API.
    pub base_url: String,
    /// Credentials for authenticated endpoints.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Temporary projects are never persisted, and neither are their conversations.
    #[serde(skip)]
    pub temporary: bool,
}

impl ProjectConfig {
    /// A throwaway project for a base URL.
    #[must_use]
    pub fn temporary(base_url: impl Into<String>) -> Self {
        Self {
            id: format!("temporary-{}", uuid::Uuid::new_v4().simple()),
            name: "Temporary".to_string(),
            base_url: base_url.into(),
            auth: AuthConfig::None,
            temporary: true,
        }
    }

    /// Load `<data dir>/projects/<id>/project.json`.
    ///
    /// # Errors
    ///
    /// Fails when the project file is missing or malformed.
    pub fn load(data_dir: &Path, id: &str) -> Result<Self, ConfigError> {
        let path = ProjectPaths::new(data_dir, id).project_file();
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Filesystem layout of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    /// Paths for project `id` under `data_dir`.
    #[must_use]
    pub fn new(data_dir: &Path, id: &str) -> Self {
        Self {
            root: data_dir.join("projects").join(id),
        }
    }

    /// Project directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `project.json`.
    #[must_use]
    pub fn project_file(&self) -> PathBuf {
        self.root.join("project.json")
    }

    /// `endpoints.json`.
    #[must_use]
    pub fn endpoints_file(&self) -> PathBuf {
        self.root.join("endpoints.json")
    }

    /// Directory of per-conversation databases.
    #[must_use]
    pub fn conversations_dir(&self) -> PathBuf {
        self.root.join("conversations")
    }

    /// Directory for generated reports.
    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("api_key"), "OCTRAFIC_API_KEY");
        assert_eq!(env_var_name("model"), "OCTRAFIC_MODEL");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<String, String> = [
            ("OCTRAFIC_PROVIDER", "ollama"),
            ("OCTRAFIC_MODEL", "llama3"),
            ("OCTRAFIC_API_KEY", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = Config {
            api_key: "from-file".into(),
            ..Config::default()
        };
        config.apply_env_from(|name| env.get(name).cloned());

        assert_eq!(config.provider, "ollama");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.api_key, "from-file");
    }

    #[test]
    fn test_validate() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        let local = Config {
            provider: "ollama".into(),
            ..Config::default()
        };
        assert!(local.validate().is_ok());

        let remote = Config {
            api_key: "sk-test".into(),
            ..Config::default()
        };
        assert!(remote.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            api_key: "sk-test".into(),
            onboarded: true,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
        assert_eq!(
            Config::load_from(&dir.path().join("absent.json")).unwrap(),
            Config::default()
        );
    }

    #[test]
    fn test_auth_config_serde() {
        let auth: AuthConfig =
            serde_json::from_str(r#"{"type":"apikey","key_name":"X-Key","key_value":"v"}"#).unwrap();
        assert_eq!(auth.auth_type(), "apikey");
        assert!(auth.is_configured());

        let project: ProjectConfig =
            serde_json::from_str(r#"{"id":"p1","base_url":"http://localhost:3000"}"#).unwrap();
        assert_eq!(project.auth, AuthConfig::None);
        assert!(!project.temporary);
    }

    #[test]
    fn test_project_paths() {
        let paths = ProjectPaths::new(Path::new("/data"), "p1");
        assert_eq!(paths.conversations_dir(), Path::new("/data/projects/p1/conversations"));
        assert_eq!(paths.endpoints_file(), Path::new("/data/projects/p1/endpoints.json"));
    }
}
