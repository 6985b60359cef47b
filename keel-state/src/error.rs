//! Errors surfaced by the deploy pipeline

use chrono::{DateTime, Utc};
use thiserror::Error;

use keel_core::export::ExportError;

use crate::guard::StatusError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DeployError {
    /// Another deployment holds the lock
    #[error(
        "Failed to acquire deployment lock on {target_dir}: held by {user} since {acquisition_time}. \
         Retry with --force-lock to take it over"
    )]
    LockHeld {
        target_dir: String,
        user: String,
        acquisition_time: DateTime<Utc>,
    },

    /// Unlock without holding the lock, or the lock was taken over
    #[error("unlock called when lock is not held on {target_dir}: {detail}")]
    LockNotHeld { target_dir: String, detail: String },

    /// The lock object vanished between write and verification
    #[error("no active lock on target dir {0}")]
    NoActiveLock(String),

    #[error(
        "Remote deployment state version {version} is newer than the supported version {supported}. \
         Upgrade to keel {min_cli_version} or later"
    )]
    IncompatibleStateVersion {
        version: u32,
        supported: u32,
        min_cli_version: String,
    },

    #[error("Deployment sequence number {0} cannot be incremented")]
    SequenceExhausted(i64),

    #[error("Remote state at {0} has no lineage")]
    MissingLineage(String),

    #[error("{kind} {id} is running")]
    ResourceRunning { kind: &'static str, id: String },

    #[error("Failed to read status of {kind} {id}: {source}")]
    StatusCheck {
        kind: &'static str,
        id: String,
        #[source]
        source: StatusError,
    },

    #[error("{0} is not supported by the {1} engine")]
    Unsupported(&'static str, &'static str),

    #[error("Invalid state at {path}: {source}")]
    InvalidState {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Deployment configuration error: {0}")]
    Configuration(String),

    #[error("Background check failed: {0}")]
    Task(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl DeployError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn invalid_state(path: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidState {
            path: path.into(),
            source,
        }
    }
}

/// Result type for deploy pipeline operations
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lock_held_names_holder() {
        let error = DeployError::LockHeld {
            target_dir: "/deployments/dev".to_string(),
            user: "alice@host".to_string(),
            acquisition_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let message = error.to_string();
        assert!(message.contains("alice@host"));
        assert!(message.contains("2024-05-01 12:00:00 UTC"));
        assert!(message.contains("--force-lock"));
    }

    #[test]
    fn incompatible_version_names_min_version() {
        let error = DeployError::IncompatibleStateVersion {
            version: 2,
            supported: 1,
            min_cli_version: "0.4.0".to_string(),
        };
        assert!(error.to_string().contains("Upgrade to keel 0.4.0"));
    }

    #[test]
    fn resource_running_message() {
        let error = DeployError::ResourceRunning {
            kind: "job",
            id: "123".to_string(),
        };
        assert_eq!(error.to_string(), "job 123 is running");
    }
}
