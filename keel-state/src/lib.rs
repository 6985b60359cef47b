//! Keel deployment safety
//!
//! Everything that keeps concurrent deploys of one target from corrupting
//! each other:
//!
//! - **Locker**: advisory lock object in the remote target directory
//! - **StateSync**: pull/push/update of the remote state, in two flavors
//!   (graph state with serial and lineage, sequence state with a file list)
//! - **Active-run guard**: refuses to deploy while a deployed job or pipeline
//!   is running
//! - **ObjectStore**: the remote filesystem these operate on (local, S3, memory)
//!
//! # Example
//!
//! ```ignore
//! use keel_state::{DeployContext, LocalIdentity, NoopHooks, create_store, run_deploy};
//!
//! let config = ProjectConfig::load(Path::new("."))?;
//! let store = create_store(&config.target.backend).await?;
//! let mut ctx = DeployContext::new(&config, store, &LocalIdentity);
//!
//! // lock, pull, update, guard, push, unlock
//! run_deploy(&mut ctx, &NoopHooks, false).await?;
//! ```

pub mod backends;
pub mod error;
pub mod guard;
pub mod identity;
pub mod inventory;
pub mod lock;
pub mod pipeline;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod sync;

pub use backends::create_store;
pub use error::{DeployError, DeployResult};
pub use guard::{PipelineState, ResourceStatusProvider, Run, StatusError, check_none_running};
pub use identity::{Identity, LocalIdentity, StaticIdentity};
pub use inventory::{DirectoryInventory, FileInventory};
pub use lock::{LockState, Locker};
pub use pipeline::{DeployContext, DeployHooks, NoopHooks, run_deploy};
pub use state::{DeploymentState, FileEntry, GraphStateHeader};
pub use store::{ObjectStore, StoreError, StoreResult, WriteMode};
pub use sync::{StatePaths, StateSync};
