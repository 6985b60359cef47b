//! In-memory object store
//!
//! Thread-safe via `Mutex`. Holds nothing across process restarts, so it is
//! only useful for tests and dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::{ObjectStore, StoreError, StoreResult, WriteMode};

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| StoreError::Io("memory store lock poisoned".to_string()))
    }

    /// Whether an object exists at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.objects()
            .map(|objects| objects.contains_key(path))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.objects()?
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, data: &[u8], mode: WriteMode) -> StoreResult<()> {
        let mut objects = self.objects()?;
        if !mode.overwrite && objects.contains_key(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        objects.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.objects()?
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}
