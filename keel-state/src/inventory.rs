//! File inventory recorded in deployment state

use std::path::{Path, PathBuf};

use crate::error::{DeployError, DeployResult};
use crate::state::FileEntry;

/// Lists the files a deploy uploads, in a stable order
pub trait FileInventory: Send + Sync {
    fn list_files(&self) -> DeployResult<Vec<FileEntry>>;
}

/// Inventory of every file under a sync root.
///
/// Hidden files and directories (including the `.keel` cache) are skipped.
/// Jupyter notebooks (`.ipynb`) are marked as notebooks.
#[derive(Debug, Clone)]
pub struct DirectoryInventory {
    root: PathBuf,
}

impl DirectoryInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn walk(&self, dir: &Path, prefix: &str, files: &mut Vec<FileEntry>) -> DeployResult<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| DeployError::io(dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| DeployError::io(dir, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            let relative = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };

            let file_type = entry.file_type().map_err(|e| DeployError::io(entry.path(), e))?;
            if file_type.is_dir() {
                self.walk(&entry.path(), &relative, files)?;
            } else if file_type.is_file() {
                let is_notebook = name.ends_with(".ipynb");
                files.push(FileEntry::new(relative, is_notebook));
            }
        }

        Ok(())
    }
}

impl FileInventory for DirectoryInventory {
    fn list_files(&self) -> DeployResult<Vec<FileEntry>> {
        let mut files = Vec::new();
        self.walk(&self.root, "", &mut files)?;
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_directory_inventory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::create_dir_all(root.join(".keel/terraform")).unwrap();
        std::fs::write(root.join("keel.json"), "{}").unwrap();
        std::fs::write(root.join("src/nested/etl.ipynb"), "{}").unwrap();
        std::fs::write(root.join("src/lib.py"), "").unwrap();
        std::fs::write(root.join(".keel/terraform/terraform.tfstate"), "{}").unwrap();
        std::fs::write(root.join(".hidden"), "").unwrap();

        let files = DirectoryInventory::new(root).list_files().unwrap();
        assert_eq!(
            files,
            vec![
                FileEntry::new("keel.json", false),
                FileEntry::new("src/lib.py", false),
                FileEntry::new("src/nested/etl.ipynb", true),
            ]
        );
    }

    #[test]
    fn test_missing_root() {
        let dir = tempdir().unwrap();
        let result = DirectoryInventory::new(dir.path().join("nope")).list_files();
        assert!(matches!(result, Err(DeployError::Io { .. })));
    }
}
