//! Local filesystem object store
//!
//! Maps remote paths onto a root directory. Useful for development and for
//! deployments whose target is a shared or mounted filesystem.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use keel_core::config::BackendConfig;

use crate::store::{ObjectStore, StoreError, StoreResult, WriteMode};

/// Filesystem-backed object store rooted at a directory
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Default root directory when no path is configured
    pub const DEFAULT_ROOT: &'static str = ".keel/remote";

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create a LocalStore from configuration
    pub fn from_config(config: &BackendConfig) -> StoreResult<Self> {
        let root = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_ROOT));

        Ok(Self::with_root(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn io_error(action: &str, path: &str, err: std::io::Error) -> StoreError {
    StoreError::Io(format!("Failed to {} {}: {}", action, path, err))
}

/// Hidden sibling of `target` used to stage a write
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

fn publish(staged: &Path, target: &Path, path: &str, overwrite: bool) -> StoreResult<()> {
    if overwrite {
        return std::fs::rename(staged, target).map_err(|e| io_error("replace", path, e));
    }
    match std::fs::hard_link(staged, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(StoreError::AlreadyExists(path.to_string()))
        }
        Err(e) => Err(io_error("create", path, e)),
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        match std::fs::read(self.resolve(path)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(path.to_string())),
            Err(e) => Err(io_error("read", path, e)),
        }
    }

    async fn write(&self, path: &str, data: &[u8], mode: WriteMode) -> StoreResult<()> {
        let file_path = self.resolve(path);

        if mode.create_parents
            && let Some(parent) = file_path.parent()
        {
            std::fs::create_dir_all(parent).map_err(|e| io_error("create parent of", path, e))?;
        }

        // Readers only ever see a complete file: stage the payload next to the
        // target, then link (exclusive) or rename (overwrite) it into place.
        let staged = staging_path(&file_path);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged)
            .map_err(|e| io_error("stage", path, e))?;

        let published = file
            .write_all(data)
            .and_then(|()| file.sync_all())
            .map_err(|e| io_error("write", path, e))
            .and_then(|()| {
                drop(file);
                publish(&staged, &file_path, path, mode.overwrite)
            });

        if !mode.overwrite || published.is_err() {
            let _ = std::fs::remove_file(&staged);
        }
        published
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        match std::fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(path.to_string())),
            Err(e) => Err(io_error("delete", path, e)),
        }
    }
}
