use serde::Serialize;

/// Inputs handed to the remote workflow.
///
/// The job echoes `callback_header` back on every request it sends to
/// `callback_url` and `status_url`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchInputs {
    pub work_dir: String,
    pub browser: String,
    pub callback_url: String,
    pub status_url: String,
    /// `<header-name>:<correlation-key>`
    pub callback_header: String,
}

/// A `workflow_dispatch` trigger for one run.
#[derive(Debug, Clone)]
pub struct WorkflowDispatch {
    pub workflow_id: String,
    pub git_ref: String,
    pub inputs: DispatchInputs,
}
