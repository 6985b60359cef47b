//! Active-run guard
//!
//! Before a destructive deploy, checks every deployed job and pipeline for
//! activity. One check runs per resource, all concurrently; the first
//! resource found running aborts the rest.
//!
//! Job and pipeline failures are treated differently: an error reading a
//! job's runs fails the guard, while an error reading a pipeline's status is
//! treated as "not running".

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinSet;

use keel_core::resource::{ExportedResources, ResourceGroup};

use crate::error::{DeployError, DeployResult};

/// Error retrieving the status of a remote resource
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

/// An active run of a job
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Run {
    pub run_id: i64,
}

/// Lifecycle state of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Failed,
    Deleted,
    Running,
    Starting,
    Stopping,
    Deploying,
    Recovering,
    Resetting,
    Other(String),
}

impl PipelineState {
    /// Parse the wire name (e.g. "IDLE", "RUNNING")
    pub fn from_name(name: &str) -> Self {
        match name {
            "IDLE" => PipelineState::Idle,
            "FAILED" => PipelineState::Failed,
            "DELETED" => PipelineState::Deleted,
            "RUNNING" => PipelineState::Running,
            "STARTING" => PipelineState::Starting,
            "STOPPING" => PipelineState::Stopping,
            "DEPLOYING" => PipelineState::Deploying,
            "RECOVERING" => PipelineState::Recovering,
            "RESETTING" => PipelineState::Resetting,
            other => PipelineState::Other(other.to_string()),
        }
    }

    /// Anything but idle, failed or deleted counts as running
    pub fn is_running(&self) -> bool {
        !matches!(
            self,
            PipelineState::Idle | PipelineState::Failed | PipelineState::Deleted
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("IDLE"),
            PipelineState::Failed => f.write_str("FAILED"),
            PipelineState::Deleted => f.write_str("DELETED"),
            PipelineState::Running => f.write_str("RUNNING"),
            PipelineState::Starting => f.write_str("STARTING"),
            PipelineState::Stopping => f.write_str("STOPPING"),
            PipelineState::Deploying => f.write_str("DEPLOYING"),
            PipelineState::Recovering => f.write_str("RECOVERING"),
            PipelineState::Resetting => f.write_str("RESETTING"),
            PipelineState::Other(name) => f.write_str(name),
        }
    }
}

/// Reads the live status of deployed jobs and pipelines
#[async_trait]
pub trait ResourceStatusProvider: Send + Sync {
    /// Active runs of a job; empty when the job is not running
    async fn job_active_runs(&self, job_id: &str) -> Result<Vec<Run>, StatusError>;

    async fn pipeline_status(&self, pipeline_id: &str) -> Result<PipelineState, StatusError>;
}

async fn check_job(provider: Arc<dyn ResourceStatusProvider>, id: String) -> DeployResult<()> {
    let runs = provider
        .job_active_runs(&id)
        .await
        .map_err(|source| DeployError::StatusCheck {
            kind: "job",
            id: id.clone(),
            source,
        })?;

    if runs.is_empty() {
        Ok(())
    } else {
        Err(DeployError::ResourceRunning { kind: "job", id })
    }
}

async fn check_pipeline(provider: Arc<dyn ResourceStatusProvider>, id: String) -> DeployResult<()> {
    match provider.pipeline_status(&id).await {
        Ok(state) if state.is_running() => {
            debug!("pipeline {} is {}", id, state);
            Err(DeployError::ResourceRunning {
                kind: "pipeline",
                id,
            })
        }
        Ok(_) => Ok(()),
        Err(e) => {
            warn!("Failed to read status of pipeline {}: {}", id, e);
            Ok(())
        }
    }
}

/// Fail if any deployed job or pipeline in `remote` is currently running
pub async fn check_none_running(
    provider: Arc<dyn ResourceStatusProvider>,
    remote: &ExportedResources,
) -> DeployResult<()> {
    let mut checks = JoinSet::new();

    for (key, state) in remote {
        if state.id.is_empty() {
            continue;
        }

        let provider = provider.clone();
        let id = state.id.clone();
        match key.group {
            ResourceGroup::Jobs => {
                checks.spawn(check_job(provider, id));
            }
            ResourceGroup::Pipelines => {
                checks.spawn(check_pipeline(provider, id));
            }
            _ => {}
        }
    }

    debug!("Checking {} resources for active runs", checks.len());

    while let Some(joined) = checks.join_next().await {
        let outcome = joined.map_err(|e| DeployError::Task(e.to_string()));
        if let Err(e) = outcome.and_then(|result| result) {
            // Remaining checks are cancelled at their next await point
            checks.abort_all();
            return Err(e);
        }
    }

    Ok(())
}
