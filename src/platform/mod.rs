pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    /// Start one run of a remote workflow.
    ///
    /// Success only means the CI system accepted the request; results arrive
    /// later through the callback endpoint.
    async fn trigger(&self, dispatch: &WorkflowDispatch) -> Result<()>;
}
