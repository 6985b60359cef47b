//! Advisory deployment lock
//!
//! A lock is a JSON object at `<target>/deploy.lock`. Acquisition writes a
//! fresh lock object (exclusive create, or overwrite when forced) and then
//! reads it back: whoever's id is in the object holds the lock.
//!
//! Forced acquisition does not guarantee exclusivity. Two forced lockers
//! racing can both observe their own write during verification and both
//! believe they hold the lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::store::{ObjectStore, StoreError, WriteMode, join_path};

/// Name of the lock object inside the target directory
pub const LOCK_FILE_NAME: &str = "deploy.lock";

/// Contents of the lock object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    /// Unique per acquisition attempt
    pub id: String,
    pub acquisition_time: DateTime<Utc>,
    pub is_forced: bool,
    /// Who acquired the lock
    pub user: String,
}

impl LockState {
    /// Create a candidate lock with a fresh id
    pub fn new(user: impl Into<String>, is_forced: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            acquisition_time: Utc::now(),
            is_forced,
            user: user.into(),
        }
    }
}

enum Verification {
    Held,
    Missing,
    HeldBy(LockState),
}

/// Client handle for the lock on one target directory.
///
/// `active` is this process's belief that the remote lock object carries
/// `state.id`.
pub struct Locker {
    store: Arc<dyn ObjectStore>,
    target_dir: String,
    active: bool,
    state: LockState,
}

impl Locker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        target_dir: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            store,
            target_dir: target_dir.into(),
            active: false,
            state: LockState::new(user, false),
        }
    }

    /// Rebuild an active handle for a lock acquired by an earlier invocation
    pub fn resume(store: Arc<dyn ObjectStore>, target_dir: impl Into<String>, state: LockState) -> Self {
        Self {
            store,
            target_dir: target_dir.into(),
            active: true,
            state,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> &LockState {
        &self.state
    }

    pub fn target_dir(&self) -> &str {
        &self.target_dir
    }

    pub fn lock_path(&self) -> String {
        join_path(&self.target_dir, LOCK_FILE_NAME)
    }

    /// Acquire the lock.
    ///
    /// Without `force` this fails with `LockHeld` when another deployment
    /// holds the lock. With `force` an existing lock is overwritten.
    pub async fn lock(&mut self, force: bool) -> DeployResult<()> {
        let candidate = LockState::new(self.state.user.clone(), force);
        let body = serde_json::to_vec_pretty(&candidate)
            .map_err(|e| DeployError::invalid_state(self.lock_path(), e))?;

        let mode = if force {
            WriteMode::overwrite()
        } else {
            WriteMode::exclusive()
        };

        match self.store.write(&self.lock_path(), &body, mode).await {
            Ok(()) => {}
            // Fall through: verification reports who holds the lock
            Err(StoreError::AlreadyExists(_)) => {
                debug!("Lock object already exists at {}", self.lock_path())
            }
            Err(e) => return Err(e.into()),
        }

        match self.verify(&candidate.id).await? {
            Verification::Held => {
                info!(
                    "Acquired deployment lock on {}{}",
                    self.target_dir,
                    if force { " (forced)" } else { "" }
                );
                self.state = candidate;
                self.active = true;
                Ok(())
            }
            Verification::Missing => Err(DeployError::NoActiveLock(self.target_dir.clone())),
            Verification::HeldBy(holder) => Err(DeployError::LockHeld {
                target_dir: self.target_dir.clone(),
                user: holder.user,
                acquisition_time: holder.acquisition_time,
            }),
        }
    }

    /// Release the lock.
    ///
    /// With `allow_missing`, a lock object that no longer exists counts as
    /// released. A lock held by someone else is never deleted.
    pub async fn unlock(&mut self, allow_missing: bool) -> DeployResult<()> {
        if !self.active {
            return Err(DeployError::LockNotHeld {
                target_dir: self.target_dir.clone(),
                detail: "this deployment has not acquired it".to_string(),
            });
        }

        match self.verify(&self.state.id).await? {
            Verification::Held => {}
            Verification::Missing if allow_missing => {
                debug!("Lock on {} already gone", self.target_dir);
                self.active = false;
                return Ok(());
            }
            Verification::Missing => return Err(DeployError::NoActiveLock(self.target_dir.clone())),
            Verification::HeldBy(holder) => {
                return Err(DeployError::LockNotHeld {
                    target_dir: self.target_dir.clone(),
                    detail: format!(
                        "lock is held by {} since {}",
                        holder.user, holder.acquisition_time
                    ),
                });
            }
        }

        match self.store.delete(&self.lock_path()).await {
            Ok(()) => {}
            Err(e) if allow_missing && e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        info!("Released deployment lock on {}", self.target_dir);
        self.active = false;
        Ok(())
    }

    /// Read the lock object currently on the target, if any.
    ///
    /// Never changes `active`; safe to call without holding the lock.
    pub async fn active_lock_state(&self) -> DeployResult<Option<LockState>> {
        let path = self.lock_path();
        match self.store.read(&path).await {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes)
                    .map_err(|e| DeployError::invalid_state(path, e))?;
                Ok(Some(state))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn verify(&self, id: &str) -> DeployResult<Verification> {
        Ok(match self.active_lock_state().await? {
            None => Verification::Missing,
            Some(current) if current.id == id => Verification::Held,
            Some(current) => Verification::HeldBy(current),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{LocalStore, MemoryStore};
    use tempfile::tempdir;

    const TARGET: &str = "/deployments/dev";

    fn memory_store() -> Arc<dyn ObjectStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_lock_state_new() {
        let a = LockState::new("alice@host", false);
        let b = LockState::new("alice@host", false);
        assert_ne!(a.id, b.id);
        assert!(!a.is_forced);
        assert_eq!(a.user, "alice@host");
    }

    #[test]
    fn test_lock_state_wire_format() {
        let state = LockState::new("alice@host", true);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["id"], state.id.as_str());
        assert_eq!(json["is_forced"], true);
        assert_eq!(json["user"], "alice@host");
        let time = json["acquisition_time"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(time).is_ok());
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let store = memory_store();
        let mut locker = Locker::new(store.clone(), TARGET, "alice@host");

        locker.lock(false).await.unwrap();
        assert!(locker.is_active());

        let remote = locker.active_lock_state().await.unwrap().unwrap();
        assert_eq!(&remote, locker.state());

        locker.unlock(false).await.unwrap();
        assert!(!locker.is_active());
        assert!(locker.active_lock_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_locker_sees_holder() {
        let store = memory_store();
        let mut alice = Locker::new(store.clone(), TARGET, "alice@host");
        let mut bob = Locker::new(store.clone(), TARGET, "bob@host");

        alice.lock(false).await.unwrap();
        let err = bob.lock(false).await.unwrap_err();

        match err {
            DeployError::LockHeld { user, acquisition_time, .. } => {
                assert_eq!(user, "alice@host");
                assert_eq!(acquisition_time, alice.state().acquisition_time);
            }
            other => panic!("Expected LockHeld, got {other:?}"),
        }
        assert!(!bob.is_active());
    }

    #[tokio::test]
    async fn test_lock_released_can_be_reacquired() {
        let store = memory_store();
        let mut alice = Locker::new(store.clone(), TARGET, "alice@host");
        let mut bob = Locker::new(store.clone(), TARGET, "bob@host");

        alice.lock(false).await.unwrap();
        alice.unlock(false).await.unwrap();

        bob.lock(false).await.unwrap();
        assert!(bob.is_active());
    }

    #[tokio::test]
    async fn test_force_takes_over() {
        let store = memory_store();
        let mut alice = Locker::new(store.clone(), TARGET, "alice@host");
        let mut bob = Locker::new(store.clone(), TARGET, "bob@host");

        alice.lock(false).await.unwrap();
        bob.lock(true).await.unwrap();
        assert!(bob.is_active());
        assert!(bob.state().is_forced);

        // Alice still believes she holds it, but may not delete Bob's lock
        let err = alice.unlock(false).await.unwrap_err();
        assert!(matches!(err, DeployError::LockNotHeld { ref detail, .. } if detail.contains("bob@host")));
        assert_eq!(
            alice.active_lock_state().await.unwrap().unwrap().id,
            bob.state().id
        );
    }

    #[tokio::test]
    async fn test_forced_race_both_may_believe_they_hold_it() {
        let store = memory_store();
        let mut alice = Locker::new(store.clone(), TARGET, "alice@host");
        let mut bob = Locker::new(store.clone(), TARGET, "bob@host");

        // Sequential forced acquisitions both verify against their own write
        alice.lock(true).await.unwrap();
        bob.lock(true).await.unwrap();
        assert!(alice.is_active());
        assert!(bob.is_active());
    }

    #[tokio::test]
    async fn test_unlock_without_lock() {
        let mut locker = Locker::new(memory_store(), TARGET, "alice@host");
        let err = locker.unlock(true).await.unwrap_err();
        assert!(matches!(err, DeployError::LockNotHeld { .. }));
        assert!(err.to_string().starts_with("unlock called when lock is not held"));
    }

    #[tokio::test]
    async fn test_unlock_missing_lock() {
        let store = memory_store();
        let mut locker = Locker::new(store.clone(), TARGET, "alice@host");
        locker.lock(false).await.unwrap();
        store.delete(&locker.lock_path()).await.unwrap();

        let err = locker.unlock(false).await.unwrap_err();
        assert!(matches!(err, DeployError::NoActiveLock(_)));
        assert!(locker.is_active());

        locker.unlock(true).await.unwrap();
        assert!(!locker.is_active());
    }

    #[tokio::test]
    async fn test_active_lock_state_does_not_change_handle() {
        let store = memory_store();
        let mut alice = Locker::new(store.clone(), TARGET, "alice@host");
        let bob = Locker::new(store.clone(), TARGET, "bob@host");

        assert!(bob.active_lock_state().await.unwrap().is_none());
        alice.lock(false).await.unwrap();

        let seen = bob.active_lock_state().await.unwrap().unwrap();
        assert_eq!(seen.user, "alice@host");
        assert!(!bob.is_active());
    }

    #[tokio::test]
    async fn test_resume_releases_earlier_lock() {
        let store = memory_store();
        let mut first = Locker::new(store.clone(), TARGET, "alice@host");
        first.lock(false).await.unwrap();

        let mut resumed = Locker::resume(store.clone(), TARGET, first.state().clone());
        resumed.unlock(false).await.unwrap();
        assert!(first.active_lock_state().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_lockers_one_wins() {
        const LOCKERS: usize = 8;

        for _round in 0..20 {
            let dir = tempdir().unwrap();
            let store: Arc<dyn ObjectStore> =
                Arc::new(LocalStore::with_root(dir.path().to_path_buf()));
            let start = Arc::new(tokio::sync::Barrier::new(LOCKERS));

            let mut handles = Vec::new();
            for i in 0..LOCKERS {
                let store = store.clone();
                let start = start.clone();
                handles.push(tokio::spawn(async move {
                    let mut locker = Locker::new(store, TARGET, format!("user{i}@host"));
                    start.wait().await;
                    let result = locker.lock(false).await;
                    (locker.state().user.clone(), result)
                }));
            }

            let mut winners = Vec::new();
            let mut errors = Vec::new();
            for handle in handles {
                let (user, result) = handle.await.unwrap();
                match result {
                    Ok(()) => winners.push(user),
                    Err(e) => errors.push(e),
                }
            }

            assert_eq!(winners.len(), 1);
            assert_eq!(errors.len(), LOCKERS - 1);
            for error in errors {
                match error {
                    DeployError::LockHeld { user, .. } => assert_eq!(user, winners[0]),
                    other => panic!("Expected LockHeld, got {other:?}"),
                }
            }
        }
    }
}
