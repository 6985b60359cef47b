//! State synchronization between the local cache and the remote target
//!
//! Both state flavors share one shape: `pull` adopts the remote copy when it
//! is newer, `push` uploads the local copy after a successful apply, and
//! `update` (direct engine only) stamps a new revision before pushing.
//!
//! The direct engine keeps two documents: the sequence-numbered deployment
//! state and a resource database ordered by serial and lineage like the
//! terraform graph state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use keel_core::config::Engine;

use crate::error::{DeployError, DeployResult};
use crate::inventory::FileInventory;
use crate::snapshot::SyncSnapshot;
use crate::state::{
    DEPLOYMENT_STATE_FILE, DeploymentState, GRAPH_STATE_FILE, GraphStateHeader,
    RESOURCE_DATABASE_FILE,
};
use crate::store::{ObjectStore, WriteMode, join_path};

/// Pull/push/update of one state flavor
#[async_trait]
pub trait StateSync: Send + Sync {
    /// Replace the local cache with the remote state if the remote is newer
    async fn pull(&self) -> DeployResult<()>;

    /// Upload the local state to the remote target
    async fn push(&self) -> DeployResult<()>;

    /// Record a new revision in the local state
    async fn update(&self) -> DeployResult<()>;

    /// Whether `update` is meaningful for this flavor
    fn supports_update(&self) -> bool;

    /// Path of the local cache file
    fn local_path(&self) -> &Path;

    /// Path of the remote state object
    fn remote_path(&self) -> &str;
}

/// Where one state flavor lives locally and remotely
#[derive(Clone)]
pub struct StateLocation {
    pub store: Arc<dyn ObjectStore>,
    pub local_path: PathBuf,
    pub remote_path: String,
}

impl StateLocation {
    async fn read_remote(&self) -> DeployResult<Option<Vec<u8>>> {
        match self.store.read(&self.remote_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_local(&self) -> DeployResult<Option<Vec<u8>>> {
        match std::fs::read(&self.local_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployError::io(&self.local_path, e)),
        }
    }

    /// Truncate and rewrite the local cache file
    fn write_local(&self, bytes: &[u8]) -> DeployResult<()> {
        if let Some(parent) = self.local_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
        }
        std::fs::write(&self.local_path, bytes).map_err(|e| DeployError::io(&self.local_path, e))
    }

    async fn push(&self) -> DeployResult<()> {
        let Some(bytes) = self.read_local()? else {
            debug!(
                "No local state at {}, nothing to push",
                self.local_path.display()
            );
            return Ok(());
        };

        info!("Uploading deployment state to {}", self.remote_path);
        self.store
            .write(&self.remote_path, &bytes, WriteMode::overwrite())
            .await?;
        Ok(())
    }
}

/// State ordered by serial and lineage (terraform graph state, direct-engine
/// resource database)
pub struct GraphStateSync {
    location: StateLocation,
}

impl GraphStateSync {
    pub fn new(location: StateLocation) -> Self {
        Self { location }
    }
}

#[async_trait]
impl StateSync for GraphStateSync {
    async fn pull(&self) -> DeployResult<()> {
        let location = &self.location;
        let Some(remote_bytes) = location.read_remote().await? else {
            debug!("No remote state at {}", location.remote_path);
            return Ok(());
        };

        let remote = GraphStateHeader::parse(&remote_bytes, &location.remote_path)?;
        if remote.lineage.is_empty() {
            return Err(DeployError::MissingLineage(location.remote_path.clone()));
        }

        let Some(local_bytes) = location.read_local()? else {
            debug!("No local state, adopting remote state (serial {})", remote.serial);
            return location.write_local(&remote_bytes);
        };

        let local = GraphStateHeader::parse(&local_bytes, &location.local_path.display().to_string())?;

        if local.lineage != remote.lineage {
            warn!(
                "Remote state lineage {} differs from local lineage {}; replacing local state",
                remote.lineage, local.lineage
            );
            return location.write_local(&remote_bytes);
        }

        if remote.serial > local.serial {
            debug!(
                "Remote state is newer (serial {} > {}), replacing local state",
                remote.serial, local.serial
            );
            return location.write_local(&remote_bytes);
        }

        debug!(
            "Local state is up to date (serial {} >= {})",
            local.serial, remote.serial
        );
        Ok(())
    }

    async fn push(&self) -> DeployResult<()> {
        self.location.push().await
    }

    async fn update(&self) -> DeployResult<()> {
        Err(DeployError::Unsupported("state update", "terraform"))
    }

    fn supports_update(&self) -> bool {
        false
    }

    fn local_path(&self) -> &Path {
        &self.location.local_path
    }

    fn remote_path(&self) -> &str {
        &self.location.remote_path
    }
}

/// Sequence-numbered state with a file inventory (direct engine)
pub struct SequenceStateSync {
    location: StateLocation,
    /// Resource database synced alongside the deployment state
    resources: GraphStateSync,
    inventory: Arc<dyn FileInventory>,
    snapshot_path: PathBuf,
    sync_root: PathBuf,
    /// Remote directory the synced files are uploaded to
    files_path: String,
}

impl SequenceStateSync {
    pub fn new(
        location: StateLocation,
        resources: StateLocation,
        inventory: Arc<dyn FileInventory>,
        snapshot_path: PathBuf,
        sync_root: PathBuf,
        files_path: String,
    ) -> Self {
        Self {
            location,
            resources: GraphStateSync::new(resources),
            inventory,
            snapshot_path,
            sync_root,
            files_path,
        }
    }

    fn load_local(&self) -> DeployResult<Option<DeploymentState>> {
        match self.location.read_local()? {
            Some(bytes) => {
                let path = self.location.local_path.display().to_string();
                DeploymentState::parse(&bytes, &path).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StateSync for SequenceStateSync {
    async fn pull(&self) -> DeployResult<()> {
        self.resources.pull().await?;

        let location = &self.location;
        let Some(remote_bytes) = location.read_remote().await? else {
            debug!("No remote state at {}", location.remote_path);
            return Ok(());
        };

        let remote = DeploymentState::parse(&remote_bytes, &location.remote_path)?;
        let local_seq = self.load_local()?.map_or(i64::MIN, |local| local.seq);

        if remote.seq <= local_seq {
            debug!("Local state is up to date (seq {} >= {})", local_seq, remote.seq);
            return Ok(());
        }

        debug!("Remote state is newer (seq {}), replacing local state", remote.seq);
        location.write_local(&remote_bytes)?;

        SyncSnapshot::from_files(&remote.files, &self.sync_root, &self.files_path)
            .save(&self.snapshot_path)
    }

    async fn push(&self) -> DeployResult<()> {
        self.resources.push().await?;
        self.location.push().await
    }

    async fn update(&self) -> DeployResult<()> {
        let mut state = self.load_local()?.unwrap_or_default();
        state.advance(self.inventory.list_files()?)?;

        let path = self.location.local_path.display().to_string();
        let bytes = serde_json::to_vec_pretty(&state).map_err(|e| DeployError::invalid_state(path, e))?;
        self.location.write_local(&bytes)?;

        debug!("Updated local deployment state to seq {}", state.seq);
        Ok(())
    }

    fn supports_update(&self) -> bool {
        true
    }

    fn local_path(&self) -> &Path {
        &self.location.local_path
    }

    fn remote_path(&self) -> &str {
        &self.location.remote_path
    }
}

/// Paths used to build the state synchronizer for an engine
pub struct StatePaths {
    /// Remote target directory
    pub target_dir: String,
    /// Local cache directory
    pub cache_dir: PathBuf,
    pub sync_root: PathBuf,
}

impl StatePaths {
    pub fn graph_state_local(&self) -> PathBuf {
        self.cache_dir.join("terraform").join(GRAPH_STATE_FILE)
    }

    pub fn deployment_state_local(&self) -> PathBuf {
        self.cache_dir.join(DEPLOYMENT_STATE_FILE)
    }

    pub fn snapshot_local(&self) -> PathBuf {
        self.cache_dir.join("sync-snapshot.json")
    }

    /// Direct-engine resource database
    pub fn resource_database_local(&self) -> PathBuf {
        self.cache_dir.join(RESOURCE_DATABASE_FILE)
    }

    pub fn resource_database_remote(&self) -> String {
        join_path(&self.target_dir, RESOURCE_DATABASE_FILE)
    }

    pub fn files_remote(&self) -> String {
        join_path(&self.target_dir, "files")
    }
}

/// Select the state flavor for a deployment engine
pub fn for_engine(
    engine: Engine,
    store: Arc<dyn ObjectStore>,
    paths: &StatePaths,
    inventory: Arc<dyn FileInventory>,
) -> Box<dyn StateSync> {
    match engine {
        Engine::Terraform => Box::new(GraphStateSync::new(StateLocation {
            store,
            local_path: paths.graph_state_local(),
            remote_path: join_path(&paths.target_dir, GRAPH_STATE_FILE),
        })),
        Engine::Direct => Box::new(SequenceStateSync::new(
            StateLocation {
                store: store.clone(),
                local_path: paths.deployment_state_local(),
                remote_path: join_path(&paths.target_dir, DEPLOYMENT_STATE_FILE),
            },
            StateLocation {
                store,
                local_path: paths.resource_database_local(),
                remote_path: paths.resource_database_remote(),
            },
            inventory,
            paths.snapshot_local(),
            paths.sync_root.clone(),
            paths.files_remote(),
        )),
    }
}
