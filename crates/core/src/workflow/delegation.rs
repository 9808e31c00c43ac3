use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::{ApprovalStep, StepId, Workflow};
use crate::errors::WorkflowError;
use crate::workflow::decisions::authorize_step;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub step_id: StepId,
    pub actor_id: String,
    pub delegate_to: String,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl DelegationRequest {
    pub fn new(step_id: StepId, actor_id: impl Into<String>, delegate_to: impl Into<String>) -> Self {
        Self {
            step_id,
            actor_id: actor_id.into(),
            delegate_to: delegate_to.into(),
            expected_version: None,
        }
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Returns the trimmed target when it would actually change who may decide.
pub(crate) fn validate_delegate_target(
    step: &ApprovalStep,
    target: &str,
) -> Result<String, WorkflowError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(WorkflowError::validation("delegate_to", "must not be blank"));
    }
    if target == step.approver_id {
        return Err(WorkflowError::validation(
            "delegate_to",
            "cannot delegate a step to its own approver",
        ));
    }
    if step.delegated_to.as_deref() == Some(target) {
        return Err(WorkflowError::validation(
            "delegate_to",
            format!("step is already delegated to `{target}`"),
        ));
    }
    Ok(target.to_string())
}

/// Reassigns decision authority on the active step. The original approver
/// keeps authority; only the delegate slot changes.
#[derive(Clone, Debug, Default)]
pub struct DelegationManager;

impl DelegationManager {
    pub fn delegate(
        &self,
        workflow: &mut Workflow,
        request: &DelegationRequest,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let index =
            authorize_step(workflow, &request.step_id, &request.actor_id, request.expected_version)?;
        let target = validate_delegate_target(&workflow.steps[index], &request.delegate_to)?;

        workflow.steps[index].delegated_to = Some(target);
        workflow.version += 1;
        workflow.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{DelegationManager, DelegationRequest};
    use crate::domain::workflow::{Decision, StepStatus};
    use crate::errors::WorkflowErrorKind;
    use crate::workflow::decisions::{DecisionProcessor, DecisionRequest};
    use crate::workflow::test_support::{step_id, three_step_workflow, with_first_step_approved};

    #[test]
    fn delegation_sets_target_without_touching_status_or_sequence() {
        let mut workflow = with_first_step_approved(three_step_workflow());
        let before = workflow.steps[1].clone();

        let step = step_id(&workflow, 2);
        DelegationManager
            .delegate(
                &mut workflow,
                &DelegationRequest::new(step, "user-2", "user-3"),
                Utc::now(),
            )
            .expect("approver may delegate");

        let step = &workflow.steps[1];
        assert_eq!(step.delegated_to.as_deref(), Some("user-3"));
        assert_eq!(step.status, StepStatus::InProgress);
        assert_eq!(step.sequence_number, before.sequence_number);
        assert_eq!(step.decision, before.decision);
    }

    #[test]
    fn delegate_and_original_approver_both_keep_authority() {
        let mut workflow = with_first_step_approved(three_step_workflow());
        let step = step_id(&workflow, 2);
        DelegationManager
            .delegate(
                &mut workflow,
                &DelegationRequest::new(step, "user-2", "user-3"),
                Utc::now(),
            )
            .expect("delegate");

        let processor = DecisionProcessor::default();
        let mut by_delegate = workflow.clone();
        processor
            .apply(
                &mut by_delegate,
                &DecisionRequest::new(step_id(&workflow, 2), Decision::Approved, "user-3"),
                Utc::now(),
            )
            .expect("delegate decides");

        let mut by_approver = workflow.clone();
        processor
            .apply(
                &mut by_approver,
                &DecisionRequest::new(step_id(&workflow, 2), Decision::Approved, "user-2"),
                Utc::now(),
            )
            .expect("original approver still decides");

        let step = step_id(&workflow, 2);
        let error = processor
            .apply(
                &mut workflow,
                &DecisionRequest::new(step, Decision::Approved, "user-9"),
                Utc::now(),
            )
            .expect_err("stranger cannot decide");
        assert_eq!(error.kind(), WorkflowErrorKind::InvalidActor);
    }

    #[test]
    fn delegate_may_redelegate_and_replaces_previous_delegate() {
        let mut workflow = three_step_workflow();
        let step = step_id(&workflow, 1);
        DelegationManager
            .delegate(&mut workflow, &DelegationRequest::new(step.clone(), "user-1", "user-3"), Utc::now())
            .expect("first delegation");
        DelegationManager
            .delegate(&mut workflow, &DelegationRequest::new(step.clone(), "user-3", "user-4"), Utc::now())
            .expect("delegate re-delegates");

        assert_eq!(workflow.steps[0].delegated_to.as_deref(), Some("user-4"));
        assert!(!workflow.steps[0].is_eligible("user-3"));
        assert!(workflow.steps[0].is_eligible("user-1"));
        assert_eq!(workflow.version, 3);
    }

    #[test]
    fn blank_or_unchanged_target_is_a_validation_error() {
        let mut workflow = three_step_workflow();
        let step = step_id(&workflow, 1);

        for target in ["", "  ", "user-1"] {
            let error = DelegationManager
                .delegate(&mut workflow, &DelegationRequest::new(step.clone(), "user-1", target), Utc::now())
                .expect_err("invalid target");
            assert_eq!(error.kind(), WorkflowErrorKind::Validation);
        }

        DelegationManager
            .delegate(&mut workflow, &DelegationRequest::new(step.clone(), "user-1", "user-3"), Utc::now())
            .expect("delegate");
        let error = DelegationManager
            .delegate(&mut workflow, &DelegationRequest::new(step, "user-1", "user-3"), Utc::now())
            .expect_err("already delegated to user-3");
        assert_eq!(error.kind(), WorkflowErrorKind::Validation);
    }

    #[test]
    fn ineligible_actor_and_inactive_step_are_refused() {
        let mut workflow = three_step_workflow();

        let step = step_id(&workflow, 1);
        let error = DelegationManager
            .delegate(
                &mut workflow,
                &DelegationRequest::new(step, "user-9", "user-3"),
                Utc::now(),
            )
            .expect_err("stranger");
        assert_eq!(error.kind(), WorkflowErrorKind::InvalidActor);

        let step = step_id(&workflow, 2);
        let error = DelegationManager
            .delegate(
                &mut workflow,
                &DelegationRequest::new(step, "user-2", "user-3"),
                Utc::now(),
            )
            .expect_err("waiting step");
        assert_eq!(error.kind(), WorkflowErrorKind::InvalidState);
        assert_eq!(workflow.version, 1);
    }
}
