//! Object store implementations

mod local;
mod memory;
mod s3;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

use std::sync::Arc;

use keel_core::config::BackendConfig;

use crate::store::{ObjectStore, StoreError, StoreResult};

/// Create an object store from configuration
///
/// This function dispatches to the appropriate store implementation
/// based on the backend_type in the configuration.
pub async fn create_store(config: &BackendConfig) -> StoreResult<Arc<dyn ObjectStore>> {
    match config.backend_type.as_str() {
        "local" => Ok(Arc::new(LocalStore::from_config(config)?)),
        "s3" => {
            let store = S3Store::from_config(config).await?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(StoreError::unsupported_backend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_backend() {
        let config = BackendConfig::new("unsupported");

        let result = create_store(&config).await;

        if let Err(StoreError::UnsupportedBackend(name)) = result {
            assert_eq!(name, "unsupported");
        } else {
            panic!("Expected UnsupportedBackend error");
        }
    }

    #[tokio::test]
    async fn test_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::new("local")
            .with_attribute("path", serde_json::json!(dir.path().to_str().unwrap()));

        let store = create_store(&config).await.unwrap();
        store
            .write("/x", b"1", crate::store::WriteMode::exclusive())
            .await
            .unwrap();
        assert!(dir.path().join("x").exists());
    }
}
