use chrono::{DateTime, Duration, TimeZone, Utc};

use changegate_core::domain::change_request::{ChangePriority, ChangeRequest, ChangeRequestId};
use changegate_core::domain::workflow::{Decision, StepId, StepStatus, Workflow, WorkflowId};
use changegate_core::workflow::{
    DecisionProcessor, DecisionRequest, StepTemplate, WorkflowDefinition, WorkflowRules,
};

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlWorkflowRepository, WorkflowRepository};

pub const DEMO_WORKFLOW_ID: &str = "wf-demo-001";
pub const DEMO_CHANGE_REQUEST_ID: &str = "CR-DEMO-001";

/// Approver ids of the demo workflow, in step order.
const DEMO_APPROVERS: &[(&str, &str)] =
    &[("user-1", "Ada Lovelace"), ("user-2", "Grace Hopper"), ("user-3", "Linus Torvalds")];

/// Deterministic three-step demo workflow.
///
/// Step one is approved by `user-1`, step two is in progress for `user-2` and
/// step three waits on `user-3`, which is the usual starting point for
/// exercising decisions and delegation from the CLI.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub fn workflow() -> Result<Workflow, RepositoryError> {
        let submitted_at = seed_timestamp()?;
        let change_request = ChangeRequest {
            id: ChangeRequestId(DEMO_CHANGE_REQUEST_ID.to_string()),
            title: "Upgrade payment gateway TLS configuration".to_string(),
            description: "Disable TLS 1.1 and rotate the gateway certificate chain".to_string(),
            priority: ChangePriority::High,
            category: "security".to_string(),
            requester: "user-0".to_string(),
            submitted_at,
        };
        let definition = WorkflowDefinition::new(
            "standard_change",
            DEMO_APPROVERS
                .iter()
                .map(|(approver_id, approver_name)| StepTemplate::new(*approver_id, *approver_name))
                .collect(),
        );
        let rules = WorkflowRules::default();

        let mut workflow = definition
            .instantiate_with_id(
                WorkflowId(DEMO_WORKFLOW_ID.to_string()),
                change_request,
                &rules,
                submitted_at,
            )
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        DecisionProcessor::new(rules)
            .apply(
                &mut workflow,
                &DecisionRequest::new(
                    StepId(format!("{DEMO_WORKFLOW_ID}-s1")),
                    Decision::Approved,
                    "user-1",
                )
                .with_comments("Change window confirmed with the network team"),
                submitted_at + Duration::hours(4),
            )
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        Ok(workflow)
    }

    /// Replaces any earlier copy of the demo workflow with a fresh one.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        Self::clean(pool).await?;

        let workflow = Self::workflow()?;
        SqlWorkflowRepository::new(pool.clone()).save(&workflow, None).await?;

        Ok(SeedResult {
            workflow_id: workflow.id.0.clone(),
            step_ids: workflow.steps.iter().map(|step| step.id.0.clone()).collect(),
            version: workflow.version,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();
        let stored = SqlWorkflowRepository::new(pool.clone())
            .find_by_id(&WorkflowId(DEMO_WORKFLOW_ID.to_string()))
            .await?;

        let Some(workflow) = stored else {
            checks.push(("demo-workflow-exists", false));
            return Ok(VerificationResult { all_present: false, checks });
        };
        checks.push(("demo-workflow-exists", true));
        checks.push(("demo-step-count", workflow.steps.len() == DEMO_APPROVERS.len()));
        checks.push((
            "demo-approvers",
            workflow
                .steps
                .iter()
                .map(|step| step.approver_id.as_str())
                .eq(DEMO_APPROVERS.iter().map(|(approver_id, _)| *approver_id)),
        ));
        checks.push((
            "demo-step-statuses",
            workflow.steps.iter().map(|step| step.status).eq([
                StepStatus::Completed,
                StepStatus::InProgress,
                StepStatus::Waiting,
            ]),
        ));
        checks.push(("demo-invariants", workflow.check_invariants().is_ok()));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM approval_step WHERE workflow_id = ?")
            .bind(DEMO_WORKFLOW_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM approval_workflow WHERE id = ?")
            .bind(DEMO_WORKFLOW_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM change_request WHERE id = ?")
            .bind(DEMO_CHANGE_REQUEST_ID)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn seed_timestamp() -> Result<DateTime<Utc>, RepositoryError> {
    Utc.with_ymd_and_hms(2026, 1, 12, 9, 0, 0)
        .single()
        .ok_or_else(|| RepositoryError::Decode("invalid seed timestamp".to_string()))
}

#[derive(Debug)]
pub struct SeedResult {
    pub workflow_id: String,
    pub step_ids: Vec<String>,
    pub version: u64,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn demo_workflow_is_deterministic() {
        let first = DemoSeedDataset::workflow().expect("build demo workflow");
        let second = DemoSeedDataset::workflow().expect("rebuild demo workflow");

        assert_eq!(first, second);
        assert_eq!(first.version, 2);
        first.check_invariants().expect("demo workflow is consistent");
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");

        migrations::run_pending(&pool).await.expect("run migrations");

        let before = DemoSeedDataset::verify(&pool).await.expect("verify empty database");
        assert!(!before.all_present);

        let first = DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = DemoSeedDataset::verify(&pool).await.expect("verify seed");
        assert!(first_verification.all_present, "checks: {:?}", first_verification.checks);
        assert_eq!(first.step_ids.len(), 3);

        let second = DemoSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification = DemoSeedDataset::verify(&pool).await.expect("re-verify seed");
        assert!(second_verification.all_present);
        assert_eq!(first.workflow_id, second.workflow_id);
        assert_eq!(first_verification.checks, second_verification.checks);
    }
}
