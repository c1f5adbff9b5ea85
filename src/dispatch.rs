use std::sync::Arc;

use crate::config::AppConfig;
use crate::matrix::{CorrelationKey, TestCombination};
use crate::platform::types::{DispatchInputs, WorkflowDispatch};
use crate::platform::WorkflowTrigger;

/// Starts remote runs, attaching the correlation key the job must echo back.
pub struct Dispatcher {
    trigger: Arc<dyn WorkflowTrigger>,
    git_ref: String,
    callback_url: String,
    status_url: String,
    callback_header: String,
}

impl Dispatcher {
    pub fn new(trigger: Arc<dyn WorkflowTrigger>, config: &AppConfig) -> Self {
        Self {
            trigger,
            git_ref: config.github.git_ref.clone(),
            callback_url: config.callback_url(),
            status_url: config.status_url(),
            callback_header: config.runner.callback_header.clone(),
        }
    }

    pub fn request_for(
        &self,
        combination: &TestCombination,
        key: &CorrelationKey,
    ) -> WorkflowDispatch {
        WorkflowDispatch {
            workflow_id: combination.workflow_id.clone(),
            git_ref: self.git_ref.clone(),
            inputs: DispatchInputs {
                work_dir: combination.work_dir().to_string(),
                browser: combination.browser.clone(),
                callback_url: self.callback_url.clone(),
                status_url: self.status_url.clone(),
                callback_header: format!("{}:{}", self.callback_header, key),
            },
        }
    }

    /// Trigger one run. Returns `false` if the run never started.
    pub async fn dispatch(
        &self,
        combination: &TestCombination,
        run_index: u32,
        key: &CorrelationKey,
    ) -> bool {
        let request = self.request_for(combination, key);

        match self.trigger.trigger(&request).await {
            Ok(()) => {
                tracing::info!(
                    workflow = %combination.workflow_id,
                    browser = %combination.browser,
                    test_plan = %combination.test_plan_id,
                    run = run_index,
                    key = %key,
                    "Dispatched run"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    workflow = %combination.workflow_id,
                    browser = %combination.browser,
                    test_plan = %combination.test_plan_id,
                    run = run_index,
                    error = %e,
                    "Failed to dispatch run"
                );
                false
            }
        }
    }
}
