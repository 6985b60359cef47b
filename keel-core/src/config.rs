//! Project configuration loaded from `keel.json`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::Resources;

/// Default configuration file name
pub const CONFIG_FILE: &str = "keel.json";

/// Directory next to the configuration file holding local caches
pub const CACHE_DIR: &str = ".keel";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which deployment engine manages remote state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Graph state with serial and lineage
    #[default]
    Terraform,
    /// Sequence state with a file inventory
    Direct,
}

/// Top-level project configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub target: TargetConfig,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub resources: Resources,
    /// Directory the configuration was loaded from
    #[serde(skip)]
    pub root: PathBuf,
}

impl ProjectConfig {
    /// Load configuration from a file, or from `keel.json` inside a directory
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = if path.is_dir() {
            path.join(CONFIG_FILE)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&file).map_err(|source| ConfigError::Read {
            path: file.clone(),
            source,
        })?;

        let mut config: ProjectConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: file.clone(),
                source,
            })?;

        config.root = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.target.root_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "target.root_path must not be empty".to_string(),
            ));
        }
        if self.target.backend.backend_type.is_empty() {
            return Err(ConfigError::Invalid(
                "target.backend.type must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Local cache directory (`.keel/` next to the configuration file)
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    /// Directory whose files are recorded in the deployment state
    pub fn sync_root(&self) -> PathBuf {
        match &self.sync.root {
            Some(root) => self.root.join(root),
            None => self.root.clone(),
        }
    }
}

/// Where the deployment lives remotely
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Remote directory holding the lock and state objects
    pub root_path: String,
    pub backend: BackendConfig,
}

/// Configuration for an object store backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type (e.g., "local", "s3")
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Backend-specific attributes
    #[serde(flatten)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl BackendConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Get a boolean attribute value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(|v| v.as_bool())
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// Refuse to deploy while a job or pipeline of this deployment is running
    #[serde(default)]
    pub fail_on_active_runs: bool,
    #[serde(default)]
    pub lock: LockSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Acquire the lock even if another deployment holds it
    #[serde(default)]
    pub force: bool,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            force: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Sync root relative to the configuration file
    #[serde(default)]
    pub root: Option<PathBuf>,
}
