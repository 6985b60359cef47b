//! HTTP client for live job and pipeline status

use async_trait::async_trait;
use serde::Deserialize;

use keel_state::{PipelineState, ResourceStatusProvider, Run, StatusError};

pub const HOST_ENV: &str = "KEEL_HOST";
pub const TOKEN_ENV: &str = "KEEL_TOKEN";

#[derive(Debug, Default, Deserialize)]
struct RunsListResponse {
    #[serde(default)]
    runs: Vec<Run>,
}

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    state: String,
}

pub struct WorkspaceClient {
    host: String,
    token: String,
    client: reqwest::Client,
}

impl WorkspaceClient {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    /// Client configured from `KEEL_HOST` and `KEEL_TOKEN`, if both are set
    pub fn from_env() -> Result<Option<Self>, String> {
        match (std::env::var(HOST_ENV), std::env::var(TOKEN_ENV)) {
            (Ok(host), Ok(token)) if !host.is_empty() => Self::new(host, token).map(Some),
            _ => Ok(None),
        }
    }

    fn runs_url(&self) -> String {
        format!("{}/api/2.1/jobs/runs/list", self.host)
    }

    fn pipeline_url(&self, pipeline_id: &str) -> String {
        format!("{}/api/2.0/pipelines/{}", self.host, pipeline_id)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, StatusError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StatusError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StatusError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| StatusError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ResourceStatusProvider for WorkspaceClient {
    async fn job_active_runs(&self, job_id: &str) -> Result<Vec<Run>, StatusError> {
        let request = self
            .client
            .get(self.runs_url())
            .query(&[("job_id", job_id), ("active_only", "true")]);
        let body: RunsListResponse = self.get_json(request).await?;
        Ok(body.runs)
    }

    async fn pipeline_status(&self, pipeline_id: &str) -> Result<PipelineState, StatusError> {
        let request = self.client.get(self.pipeline_url(pipeline_id));
        let body: PipelineResponse = self.get_json(request).await?;
        Ok(PipelineState::from_name(&body.state))
    }
}
