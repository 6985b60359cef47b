//! Object store trait and error types

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur when interacting with an object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Exclusive create failed because the object already exists
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// The bucket/container does not exist
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// Failed to create bucket
    #[error("Failed to create bucket: {0}")]
    BucketCreationFailed(String),

    /// Network or I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),
}

impl StoreError {
    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// How a write treats an existing object and missing parent directories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMode {
    /// Replace an existing object instead of failing with `AlreadyExists`
    pub overwrite: bool,
    pub create_parents: bool,
}

impl WriteMode {
    /// Create-if-absent, creating parent directories
    pub const fn exclusive() -> Self {
        Self {
            overwrite: false,
            create_parents: true,
        }
    }

    /// Unconditional replace, creating parent directories
    pub const fn overwrite() -> Self {
        Self {
            overwrite: true,
            create_parents: true,
        }
    }
}

/// Byte-level access to the remote deployment target.
///
/// Every write is a full-object replace; objects are never partially updated.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object
    ///
    /// Returns `StoreError::NotFound` if the object does not exist
    async fn read(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Write an object
    ///
    /// Returns `StoreError::AlreadyExists` if the object exists and the mode
    /// does not allow overwriting. The check and the write are atomic.
    async fn write(&self, path: &str, data: &[u8], mode: WriteMode) -> StoreResult<()>;

    /// Delete an object
    ///
    /// Returns `StoreError::NotFound` if the object does not exist
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Prepare the store for first use (create bucket if needed, etc.)
    async fn init(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Join a remote directory and a file name with a single `/`
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}
