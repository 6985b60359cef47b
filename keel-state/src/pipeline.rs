//! Deploy pipeline context
//!
//! Carries the lock handle, state synchronizer and collaborators through one
//! deploy:
//!
//! lock → pull → sync files → update → active-run guard → apply → push → unlock
//!
//! File sync and apply are delegated to [`DeployHooks`].

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use keel_core::config::{DeploymentSettings, Engine, ProjectConfig};
use keel_core::export;
use keel_core::resource::{ExportedResources, Resources};

use crate::error::{DeployError, DeployResult};
use crate::guard::{self, ResourceStatusProvider};
use crate::identity::Identity;
use crate::inventory::{DirectoryInventory, FileInventory};
use crate::lock::Locker;
use crate::store::ObjectStore;
use crate::sync::{self, StatePaths, StateSync};

/// Steps of a deploy performed outside this crate
#[async_trait]
pub trait DeployHooks: Send + Sync {
    /// Upload the project files to the target
    async fn sync_files(&self, _ctx: &DeployContext) -> DeployResult<()> {
        Ok(())
    }

    /// Plan and apply resource changes
    async fn apply(&self, _ctx: &DeployContext) -> DeployResult<()> {
        Ok(())
    }
}

/// Hooks that do nothing; only the lock and state steps run
pub struct NoopHooks;

impl DeployHooks for NoopHooks {}

/// Everything one deploy invocation needs
pub struct DeployContext {
    pub engine: Engine,
    pub settings: DeploymentSettings,
    pub paths: StatePaths,
    pub locker: Locker,
    pub state: Box<dyn StateSync>,
    status: Option<Arc<dyn ResourceStatusProvider>>,
}

impl DeployContext {
    pub fn new(
        config: &ProjectConfig,
        store: Arc<dyn ObjectStore>,
        identity: &dyn Identity,
    ) -> Self {
        let inventory: Arc<dyn FileInventory> = Arc::new(DirectoryInventory::new(config.sync_root()));
        Self::with_inventory(config, store, identity, inventory)
    }

    pub fn with_inventory(
        config: &ProjectConfig,
        store: Arc<dyn ObjectStore>,
        identity: &dyn Identity,
        inventory: Arc<dyn FileInventory>,
    ) -> Self {
        let paths = StatePaths {
            target_dir: config.target.root_path.clone(),
            cache_dir: config.cache_dir(),
            sync_root: config.sync_root(),
        };
        let state = sync::for_engine(config.engine, store.clone(), &paths, inventory);
        let locker = Locker::new(store, config.target.root_path.clone(), identity.current_user());

        Self {
            engine: config.engine,
            settings: config.deployment.clone(),
            paths,
            locker,
            state,
            status: None,
        }
    }

    /// Provider consulted by the active-run guard
    pub fn with_status_provider(mut self, provider: Arc<dyn ResourceStatusProvider>) -> Self {
        self.status = Some(provider);
        self
    }

    /// Acquire the deployment lock unless locking is disabled.
    ///
    /// `force_lock` forces acquisition on top of the configured setting.
    pub async fn acquire_lock(&mut self, force_lock: bool) -> DeployResult<()> {
        if !self.settings.lock.enabled {
            info!("Deployment lock disabled, skipping acquire");
            return Ok(());
        }
        let force = force_lock || self.settings.lock.force;
        self.locker.lock(force).await
    }

    /// Release the deployment lock if this invocation holds it
    pub async fn release_lock(&mut self, allow_missing: bool) -> DeployResult<()> {
        if !self.settings.lock.enabled {
            info!("Deployment lock disabled, skipping release");
            return Ok(());
        }
        self.locker.unlock(allow_missing).await
    }

    /// Deployed resources, as recorded in the local state cache.
    ///
    /// Call after `pull` so the cache reflects the remote.
    pub fn exported_resources(&self) -> DeployResult<ExportedResources> {
        let path = match self.engine {
            Engine::Terraform => self.paths.graph_state_local(),
            Engine::Direct => self.paths.resource_database_local(),
        };

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ExportedResources::new());
            }
            Err(e) => return Err(DeployError::io(&path, e)),
        };

        let exported = match self.engine {
            Engine::Terraform => export::from_graph_state(&bytes)?,
            Engine::Direct => export::from_resource_database(&bytes)?,
        };
        Ok(exported)
    }

    /// Reconcile declared resources against the local state cache
    pub fn reconciled_resources(&self, declared: &Resources) -> DeployResult<Resources> {
        let exported = self.exported_resources()?;
        let mut resources = declared.clone();
        keel_core::reconcile::reconcile(&exported, &mut resources);
        Ok(resources)
    }

    /// Run the active-run guard when enabled by configuration
    pub async fn check_active_runs(&self) -> DeployResult<()> {
        if !self.settings.fail_on_active_runs {
            return Ok(());
        }

        let Some(provider) = self.status.clone() else {
            return Err(DeployError::Configuration(
                "deployment.fail_on_active_runs requires a resource status provider".to_string(),
            ));
        };

        let exported = self.exported_resources()?;
        guard::check_none_running(provider, &exported).await
    }
}

/// Run the deploy steps between lock acquisition and release
async fn deploy_locked(ctx: &DeployContext, hooks: &dyn DeployHooks) -> DeployResult<()> {
    ctx.state.pull().await?;
    hooks.sync_files(ctx).await?;
    if ctx.state.supports_update() {
        ctx.state.update().await?;
    }
    ctx.check_active_runs().await?;
    hooks.apply(ctx).await?;
    ctx.state.push().await
}

/// Run a full deploy, releasing the lock even when a step fails
pub async fn run_deploy(
    ctx: &mut DeployContext,
    hooks: &dyn DeployHooks,
    force_lock: bool,
) -> DeployResult<()> {
    ctx.acquire_lock(force_lock).await?;

    let result = deploy_locked(ctx, hooks).await;

    let released = ctx.release_lock(false).await;
    match (result, released) {
        (Err(e), Err(release_error)) => {
            warn!("Failed to release deployment lock: {}", release_error);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), released) => released,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryStore;
    use crate::guard::{PipelineState, Run, StatusError};
    use crate::identity::StaticIdentity;
    use crate::lock::LockState;
    use crate::state::{DeploymentState, FileEntry};
    use crate::store::WriteMode;
    use keel_core::config::{BackendConfig, TargetConfig};
    use keel_core::resource::{ModifiedStatus, ResourceGroup, ResourceNode};
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    const TARGET: &str = "/deployments/dev";

    fn config(dir: &TempDir, engine: Engine) -> ProjectConfig {
        ProjectConfig {
            target: TargetConfig {
                root_path: TARGET.to_string(),
                backend: BackendConfig::new("memory"),
            },
            engine,
            deployment: DeploymentSettings::default(),
            sync: Default::default(),
            resources: Resources::new(),
            root: dir.path().to_path_buf(),
        }
    }

    struct FixedInventory;

    impl FileInventory for FixedInventory {
        fn list_files(&self) -> DeployResult<Vec<FileEntry>> {
            Ok(vec![FileEntry::new("main.py", false)])
        }
    }

    /// Records step order and checks the lock is held during apply
    #[derive(Default)]
    struct RecordingHooks {
        steps: Mutex<Vec<&'static str>>,
        fail_apply: bool,
    }

    #[async_trait]
    impl DeployHooks for RecordingHooks {
        async fn sync_files(&self, _ctx: &DeployContext) -> DeployResult<()> {
            self.steps.lock().unwrap().push("sync");
            Ok(())
        }

        async fn apply(&self, ctx: &DeployContext) -> DeployResult<()> {
            assert!(ctx.locker.is_active());
            self.steps.lock().unwrap().push("apply");
            if self.fail_apply {
                return Err(DeployError::Configuration("apply failed".to_string()));
            }
            Ok(())
        }
    }

    struct BusyJobs;

    #[async_trait]
    impl ResourceStatusProvider for BusyJobs {
        async fn job_active_runs(&self, _job_id: &str) -> Result<Vec<Run>, StatusError> {
            Ok(vec![Run { run_id: 1 }])
        }

        async fn pipeline_status(&self, _id: &str) -> Result<PipelineState, StatusError> {
            Ok(PipelineState::Idle)
        }
    }

    fn context(config: &ProjectConfig, store: Arc<MemoryStore>) -> DeployContext {
        DeployContext::with_inventory(
            config,
            store,
            &StaticIdentity("alice@host".to_string()),
            Arc::new(FixedInventory),
        )
    }

    #[tokio::test]
    async fn direct_deploy_bumps_seq_and_releases_lock() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = config(&dir, Engine::Direct);
        let mut ctx = context(&config, store.clone());
        let hooks = RecordingHooks::default();

        run_deploy(&mut ctx, &hooks, false).await.unwrap();
        run_deploy(&mut ctx, &hooks, false).await.unwrap();

        let remote = store
            .read("/deployments/dev/deployment-state.json")
            .await
            .unwrap();
        let state: DeploymentState = serde_json::from_slice(&remote).unwrap();
        assert_eq!(state.seq, 2);
        assert_eq!(state.files, vec![FileEntry::new("main.py", false)]);
        assert!(!store.contains("/deployments/dev/deploy.lock"));
        assert_eq!(
            *hooks.steps.lock().unwrap(),
            vec!["sync", "apply", "sync", "apply"]
        );
    }

    #[tokio::test]
    async fn deploy_fails_when_locked_by_someone_else() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = config(&dir, Engine::Terraform);

        let other = LockState::new("bob@host", false);
        store
            .write(
                "/deployments/dev/deploy.lock",
                &serde_json::to_vec(&other).unwrap(),
                WriteMode::exclusive(),
            )
            .await
            .unwrap();

        let mut ctx = context(&config, store.clone());
        let hooks = RecordingHooks::default();
        let err = run_deploy(&mut ctx, &hooks, false).await.unwrap_err();
        assert!(matches!(err, DeployError::LockHeld { ref user, .. } if user == "bob@host"));
        assert!(hooks.steps.lock().unwrap().is_empty());

        // Forcing takes the lock over and releases it afterwards
        run_deploy(&mut ctx, &hooks, true).await.unwrap();
        assert!(!store.contains("/deployments/dev/deploy.lock"));
    }

    #[tokio::test]
    async fn failed_apply_still_releases_lock() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = config(&dir, Engine::Direct);
        let mut ctx = context(&config, store.clone());
        let hooks = RecordingHooks {
            fail_apply: true,
            ..Default::default()
        };

        let err = run_deploy(&mut ctx, &hooks, false).await.unwrap_err();
        assert!(err.to_string().contains("apply failed"));
        assert!(!store.contains("/deployments/dev/deploy.lock"));
        assert!(!store.contains("/deployments/dev/deployment-state.json"));
    }

    #[tokio::test]
    async fn disabled_lock_is_skipped() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut config = config(&dir, Engine::Terraform);
        config.deployment.lock.enabled = false;
        let mut ctx = context(&config, store.clone());

        run_deploy(&mut ctx, &NoopHooks, false).await.unwrap();
        assert!(!ctx.locker.is_active());
    }

    #[tokio::test]
    async fn guard_blocks_running_job_when_enabled() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut config = config(&dir, Engine::Terraform);

        let graph = serde_json::json!({
            "serial": 1,
            "lineage": "aaaa",
            "resources": [{
                "mode": "managed",
                "type": "databricks_job",
                "name": "etl",
                "instances": [{"attributes": {"id": "42"}}]
            }]
        });
        store
            .write(
                "/deployments/dev/terraform.tfstate",
                graph.to_string().as_bytes(),
                WriteMode::overwrite(),
            )
            .await
            .unwrap();

        // Disabled by default: the running job is not checked
        let mut ctx = context(&config, store.clone()).with_status_provider(Arc::new(BusyJobs));
        run_deploy(&mut ctx, &NoopHooks, false).await.unwrap();

        config.deployment.fail_on_active_runs = true;
        let mut ctx = context(&config, store.clone()).with_status_provider(Arc::new(BusyJobs));
        let err = run_deploy(&mut ctx, &NoopHooks, false).await.unwrap_err();
        assert_eq!(err.to_string(), "job 42 is running");
        assert!(!store.contains("/deployments/dev/deploy.lock"));
    }

    #[tokio::test]
    async fn guard_without_provider_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir, Engine::Terraform);
        config.deployment.fail_on_active_runs = true;
        let ctx = context(&config, Arc::new(MemoryStore::new()));

        assert!(matches!(
            ctx.check_active_runs().await,
            Err(DeployError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn reconciled_resources_from_pulled_state() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = config(&dir, Engine::Terraform);
        let graph = serde_json::json!({
            "serial": 3,
            "lineage": "aaaa",
            "resources": [{
                "mode": "managed",
                "type": "databricks_job",
                "name": "test_job",
                "instances": [{"attributes": {"id": "1"}}]
            }]
        });
        store
            .write(
                "/deployments/dev/terraform.tfstate",
                graph.to_string().as_bytes(),
                WriteMode::overwrite(),
            )
            .await
            .unwrap();

        let ctx = context(&config, store);
        ctx.state.pull().await.unwrap();

        let declared = Resources::new().with_resource(ResourceGroup::Jobs, "test_job_new", ResourceNode::new());
        let resources = ctx.reconciled_resources(&declared).unwrap();

        let deleted = resources.get(ResourceGroup::Jobs, "test_job").unwrap();
        assert_eq!(deleted.id, "1");
        assert_eq!(deleted.modified_status, ModifiedStatus::Deleted);
        let created = resources.get(ResourceGroup::Jobs, "test_job_new").unwrap();
        assert_eq!(created.modified_status, ModifiedStatus::Created);
    }

    #[tokio::test]
    async fn exported_resources_without_local_state() {
        let dir = tempdir().unwrap();
        let config = config(&dir, Engine::Direct);
        let ctx = context(&config, Arc::new(MemoryStore::new()));
        assert!(ctx.exported_resources().unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_engine_reconciles_against_remote_resource_database() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut config = config(&dir, Engine::Direct);
        config.resources = Resources::new()
            .with_resource(ResourceGroup::Jobs, "etl", ResourceNode::new())
            .with_resource(ResourceGroup::Jobs, "fresh", ResourceNode::new());

        let database = serde_json::json!({
            "serial": 4,
            "lineage": "aaaa",
            "state": {
                "resources.jobs.etl": {"__id__": "42"},
                "resources.jobs.retired": {"__id__": "7"}
            }
        });
        store
            .write(
                "/deployments/dev/resources.json",
                database.to_string().as_bytes(),
                WriteMode::overwrite(),
            )
            .await
            .unwrap();

        // Fresh checkout: nothing cached locally before the pull
        let ctx = context(&config, store.clone());
        assert!(ctx.exported_resources().unwrap().is_empty());
        ctx.state.pull().await.unwrap();

        let resources = ctx.reconciled_resources(&config.resources).unwrap();
        let etl = resources.get(ResourceGroup::Jobs, "etl").unwrap();
        assert_eq!(etl.id, "42");
        assert_eq!(etl.modified_status, ModifiedStatus::Unchanged);
        let retired = resources.get(ResourceGroup::Jobs, "retired").unwrap();
        assert_eq!(retired.modified_status, ModifiedStatus::Deleted);
        let fresh = resources.get(ResourceGroup::Jobs, "fresh").unwrap();
        assert_eq!(fresh.modified_status, ModifiedStatus::Created);

        // The guard sees the deployed job as well
        config.deployment.fail_on_active_runs = true;
        let mut ctx = context(&config, store.clone()).with_status_provider(Arc::new(BusyJobs));
        let err = run_deploy(&mut ctx, &NoopHooks, false).await.unwrap_err();
        assert!(matches!(err, DeployError::ResourceRunning { kind: "job", .. }));
    }
}
