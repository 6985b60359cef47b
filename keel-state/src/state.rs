//! Deployment state documents
//!
//! Two flavors are stored remotely:
//!
//! - **Graph state** (terraform engine): an opaque resource graph of which
//!   only `serial` and `lineage` are interpreted here.
//! - **Deployment state** (direct engine): a sequence number plus the list of
//!   files the last deploy uploaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

/// Version of this tool, recorded in deployment state
pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Remote and local file name of the graph state
pub const GRAPH_STATE_FILE: &str = "terraform.tfstate";

/// Remote and local file name of the deployment state
pub const DEPLOYMENT_STATE_FILE: &str = "deployment-state.json";

/// Remote and local file name of the direct-engine resource database
pub const RESOURCE_DATABASE_FILE: &str = "resources.json";

/// The two fields of graph state this crate reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphStateHeader {
    /// Revision counter within a lineage
    #[serde(default)]
    pub serial: i64,
    /// Identifies one continuous deployment history
    #[serde(default)]
    pub lineage: String,
}

impl GraphStateHeader {
    pub fn parse(bytes: &[u8], path: &str) -> DeployResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DeployError::invalid_state(path, e))
    }
}

/// A file uploaded by a deploy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the sync root, `/`-separated
    pub path: String,
    #[serde(default)]
    pub is_notebook: bool,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, is_notebook: bool) -> Self {
        Self {
            path: path.into(),
            is_notebook,
        }
    }
}

/// Fields every schema version of the deployment state carries
#[derive(Debug, Deserialize)]
struct StateVersionHeader {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    cli_version: String,
}

/// Sequence-numbered deployment state of the direct engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Schema version
    pub version: u32,
    /// Incremented by one on every successful deploy
    pub seq: i64,
    /// Version of the tool that wrote this state
    pub cli_version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl DeploymentState {
    /// Schema version this build reads and writes
    pub const CURRENT_VERSION: u32 = 1;

    /// State for a target that has never been deployed
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            seq: 0,
            cli_version: CLI_VERSION.to_string(),
            timestamp: Utc::now(),
            files: Vec::new(),
        }
    }

    /// Parse state and reject schema versions newer than this build
    ///
    /// The version is read before the rest of the document, since newer
    /// schemas may not deserialize as this one.
    pub fn parse(bytes: &[u8], path: &str) -> DeployResult<Self> {
        let header: StateVersionHeader =
            serde_json::from_slice(bytes).map_err(|e| DeployError::invalid_state(path, e))?;
        check_version(header.version, &header.cli_version)?;

        serde_json::from_slice(bytes).map_err(|e| DeployError::invalid_state(path, e))
    }

    pub fn check_version(&self) -> DeployResult<()> {
        check_version(self.version, &self.cli_version)
    }

    /// Stamp the state for a new deploy that uploaded `files`
    pub fn advance(&mut self, files: Vec<FileEntry>) -> DeployResult<()> {
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or(DeployError::SequenceExhausted(self.seq))?;
        self.version = Self::CURRENT_VERSION;
        self.cli_version = CLI_VERSION.to_string();
        self.timestamp = Utc::now();
        self.files = files;
        Ok(())
    }
}

fn check_version(version: u32, cli_version: &str) -> DeployResult<()> {
    if version > DeploymentState::CURRENT_VERSION {
        return Err(DeployError::IncompatibleStateVersion {
            version,
            supported: DeploymentState::CURRENT_VERSION,
            min_cli_version: cli_version.to_string(),
        });
    }
    Ok(())
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self::new()
    }
}
