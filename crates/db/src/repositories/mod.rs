use async_trait::async_trait;
use thiserror::Error;

use changegate_core::domain::workflow::{StepId, Workflow, WorkflowId, WorkflowStatus};
use changegate_core::errors::ApplicationError;

pub mod memory;
pub mod workflow;

pub use memory::InMemoryWorkflowRepository;
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(
        "workflow `{workflow_id}` was modified concurrently (expected version {expected:?}, found {actual:?})"
    )]
    Conflict { workflow_id: String, expected: Option<u64>, actual: Option<u64> },
    #[error("change request `{change_request_id}` was already submitted with different contents")]
    ChangeRequestMismatch { change_request_id: String },
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict { .. } | RepositoryError::ChangeRequestMismatch { .. } => {
                ApplicationError::Conflict(error.to_string())
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Durable home of approval workflows.
///
/// `save` is optimistic. `expected_version` is the version the caller loaded,
/// or `None` for a workflow that must not exist yet; any other stored state
/// fails with [`RepositoryError::Conflict`] and writes nothing. A change
/// request is stored once; saving a workflow that carries a different copy of
/// an already stored request fails with
/// [`RepositoryError::ChangeRequestMismatch`].
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError>;

    async fn find_by_step_id(&self, step_id: &StepId)
        -> Result<Option<Workflow>, RepositoryError>;

    async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, RepositoryError>;

    async fn save(
        &self,
        workflow: &Workflow,
        expected_version: Option<u64>,
    ) -> Result<(), RepositoryError>;
}
