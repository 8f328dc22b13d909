//! Project Store Configuration
//!
//! Loaded from an optional TOML file and then overridden by environment
//! variables.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FC_PROJECT_CONFIG` | - | Path to a TOML config file |
//! | `FC_PROJECT_DB_TYPE` | `sqlite` | Backend: `memory`, `sqlite`, `postgres` |
//! | `FC_PROJECT_DB_URL` | `sqlite://./data/projects.db` | Database connection URL |
//! | `FC_PROJECT_DB_MAX_CONNECTIONS` | `10` | Connection pool size |
//! | `FC_PROJECT_ARTIFACT_DIR` | `./data/artifacts` | Local artifact storage |
//! | `FC_PROJECT_VERSION_RETENTION` | `3` | Versions kept per project |
//! | `FC_PROJECT_RETENTION_INTERVAL_SECS` | `3600` | Sweep interval |
//! | `FC_PROJECT_LOG_JSON` | `false` | JSON log output |

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ProjectError, Result};

/// Backend field-size limits enforced before writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLimits {
    pub max_name_length: usize,
    pub max_description_length: usize,
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            max_name_length: 64,
            max_description_length: 2048,
        }
    }
}

impl FieldLimits {
    pub fn check_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ProjectError::constraint("project name must not be empty"));
        }
        if name.chars().count() > self.max_name_length {
            return Err(ProjectError::constraint(format!(
                "project name exceeds {} characters",
                self.max_name_length
            )));
        }
        Ok(())
    }

    pub fn check_description(&self, description: &str) -> Result<()> {
        if description.chars().count() > self.max_description_length {
            return Err(ProjectError::constraint(format!(
                "project description exceeds {} characters",
                self.max_description_length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectStoreConfig {
    pub backend: String,
    pub database_url: String,
    pub max_connections: u32,
    pub artifact_dir: PathBuf,
    pub max_name_length: usize,
    pub max_description_length: usize,
    pub version_retention: u32,
    pub retention_interval_secs: u64,
    pub log_json: bool,
}

impl Default for ProjectStoreConfig {
    fn default() -> Self {
        let limits = FieldLimits::default();
        Self {
            backend: "sqlite".to_string(),
            database_url: "sqlite://./data/projects.db".to_string(),
            max_connections: 10,
            artifact_dir: PathBuf::from("./data/artifacts"),
            max_name_length: limits.max_name_length,
            max_description_length: limits.max_description_length,
            version_retention: 3,
            retention_interval_secs: 3600,
            log_json: false,
        }
    }
}

impl ProjectStoreConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ProjectError::constraint(format!("invalid project store config: {}", e)))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// `FC_PROJECT_CONFIG` file (if set) with environment overrides applied.
    pub fn load() -> Result<Self> {
        let base = match std::env::var("FC_PROJECT_CONFIG") {
            Ok(path) => Self::from_toml_file(path)?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("FC_PROJECT_DB_TYPE") {
            self.backend = v;
        }
        if let Ok(v) = std::env::var("FC_PROJECT_DB_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("FC_PROJECT_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(v);
        }
        self.max_connections = env_or_parse("FC_PROJECT_DB_MAX_CONNECTIONS", self.max_connections);
        self.version_retention = env_or_parse("FC_PROJECT_VERSION_RETENTION", self.version_retention);
        self.retention_interval_secs =
            env_or_parse("FC_PROJECT_RETENTION_INTERVAL_SECS", self.retention_interval_secs);
        self.log_json = env_or_parse("FC_PROJECT_LOG_JSON", self.log_json);
        self
    }

    pub fn limits(&self) -> FieldLimits {
        FieldLimits {
            max_name_length: self.max_name_length,
            max_description_length: self.max_description_length,
        }
    }
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
