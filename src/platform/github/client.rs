use async_trait::async_trait;
use octocrab::Octocrab;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::WorkflowDispatch;
use crate::platform::WorkflowTrigger;

/// Triggers GitHub Actions workflows through the `workflow_dispatch` API.
pub struct GitHubTrigger {
    client: Octocrab,
    owner: String,
    repo: String,
}

impl GitHubTrigger {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(AppError::Config("GitHub token is empty".to_string()));
        }

        let client = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self {
            client,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
        })
    }
}

#[async_trait]
impl WorkflowTrigger for GitHubTrigger {
    async fn trigger(&self, dispatch: &WorkflowDispatch) -> Result<()> {
        let inputs = serde_json::to_value(&dispatch.inputs)?;

        self.client
            .actions()
            .create_workflow_dispatch(
                &self.owner,
                &self.repo,
                &dispatch.workflow_id,
                &dispatch.git_ref,
            )
            .inputs(inputs)
            .send()
            .await
            .map_err(|e| {
                AppError::Dispatch(format!(
                    "workflow_dispatch of {} on {}/{} failed: {e}",
                    dispatch.workflow_id, self.owner, self.repo
                ))
            })?;

        Ok(())
    }
}
