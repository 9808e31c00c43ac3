use std::collections::HashMap;

use tokio::sync::RwLock;

use changegate_core::domain::workflow::{StepId, Workflow, WorkflowId, WorkflowStatus};

use super::{RepositoryError, WorkflowRepository};

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<String, Workflow>>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id.0).cloned())
    }

    async fn find_by_step_id(
        &self,
        step_id: &StepId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows
            .values()
            .find(|workflow| workflow.steps.iter().any(|step| &step.id == step_id))
            .cloned())
    }

    async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let mut listed: Vec<Workflow> = workflows
            .values()
            .filter(|workflow| status.map_or(true, |status| workflow.status == status))
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(listed)
    }

    async fn save(
        &self,
        workflow: &Workflow,
        expected_version: Option<u64>,
    ) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        let stored_version = workflows.get(&workflow.id.0).map(|stored| stored.version);
        if stored_version != expected_version {
            return Err(RepositoryError::Conflict {
                workflow_id: workflow.id.0.clone(),
                expected: expected_version,
                actual: stored_version,
            });
        }

        let rewrites_request = workflows.values().any(|stored| {
            stored.change_request.id == workflow.change_request.id
                && stored.change_request != workflow.change_request
        });
        if rewrites_request {
            return Err(RepositoryError::ChangeRequestMismatch {
                change_request_id: workflow.change_request.id.0.clone(),
            });
        }

        workflows.insert(workflow.id.0.clone(), workflow.clone());
        Ok(())
    }
}
