//! File-sync snapshot
//!
//! The file-sync engine compares the local tree against a snapshot of what it
//! last uploaded. When a newer deployment state is pulled, the snapshot is
//! rebuilt from the state's file list so the next sync diffs against what is
//! actually deployed.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::state::FileEntry;

/// Snapshot format version
pub const SNAPSHOT_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub version: String,
    /// Remote directory the files were uploaded to
    pub remote_path: String,
    /// Local modification time of each file at upload
    pub last_modified_times: BTreeMap<String, DateTime<Utc>>,
    pub local_to_remote_names: BTreeMap<String, String>,
    pub remote_to_local_names: BTreeMap<String, String>,
}

impl SyncSnapshot {
    /// Build a snapshot for `files` as deployed from `sync_root` to `remote_path`
    pub fn from_files(files: &[FileEntry], sync_root: &Path, remote_path: &str) -> Self {
        let mut snapshot = Self {
            version: SNAPSHOT_VERSION.to_string(),
            remote_path: remote_path.to_string(),
            last_modified_times: BTreeMap::new(),
            local_to_remote_names: BTreeMap::new(),
            remote_to_local_names: BTreeMap::new(),
        };

        for file in files {
            let remote = remote_name(file);
            snapshot
                .local_to_remote_names
                .insert(file.path.clone(), remote.clone());
            snapshot
                .remote_to_local_names
                .insert(remote, file.path.clone());

            // Files missing locally show up as deletions in the next sync
            if let Ok(modified) = std::fs::metadata(sync_root.join(&file.path)).and_then(|m| m.modified()) {
                snapshot
                    .last_modified_times
                    .insert(file.path.clone(), DateTime::<Utc>::from(modified));
            }
        }

        snapshot
    }

    pub fn save(&self, path: &Path) -> DeployResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
        }
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| DeployError::invalid_state(path.display().to_string(), e))?;
        std::fs::write(path, content).map_err(|e| DeployError::io(path, e))
    }

    pub fn load(path: &Path) -> DeployResult<Option<Self>> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DeployError::io(path, e)),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| DeployError::invalid_state(path.display().to_string(), e))
    }
}

/// Notebooks are stored remotely without their extension
fn remote_name(file: &FileEntry) -> String {
    if !file.is_notebook {
        return file.path.clone();
    }

    let (dir, name) = match file.path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, file.path.as_str()),
    };
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);

    match dir {
        Some(dir) => format!("{}/{}", dir, stem),
        None => stem.to_string(),
    }
}
