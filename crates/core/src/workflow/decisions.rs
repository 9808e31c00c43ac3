use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::{
    Decision, StepId, StepStatus, Workflow, WorkflowSnapshot, WorkflowStatus,
};
use crate::errors::WorkflowError;
use crate::workflow::delegation::validate_delegate_target;
use crate::workflow::WorkflowRules;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub step_id: StepId,
    pub decision: Decision,
    pub actor_id: String,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub conditions: Option<String>,
    /// Target actor when `decision` is `delegated`.
    #[serde(default)]
    pub delegate_to: Option<String>,
    /// Optimistic concurrency guard; `None` skips the check.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl DecisionRequest {
    pub fn new(step_id: StepId, decision: Decision, actor_id: impl Into<String>) -> Self {
        Self {
            step_id,
            decision,
            actor_id: actor_id.into(),
            comments: None,
            conditions: None,
            delegate_to: None,
            expected_version: None,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_conditions(mut self, conditions: impl Into<String>) -> Self {
        self.conditions = Some(conditions.into());
        self
    }

    pub fn delegating_to(mut self, target: impl Into<String>) -> Self {
        self.delegate_to = Some(target.into());
        self
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Locates the step and checks the preconditions shared by decisions and
/// delegations: known step, live workflow, active step, eligible actor.
pub(crate) fn authorize_step(
    workflow: &Workflow,
    step_id: &StepId,
    actor_id: &str,
    expected_version: Option<u64>,
) -> Result<usize, WorkflowError> {
    let index = workflow
        .step_index(step_id)
        .ok_or_else(|| WorkflowError::NotFound { entity: "step", id: step_id.0.clone() })?;

    if let Some(expected) = expected_version {
        if expected != workflow.version {
            return Err(WorkflowError::invalid_state(
                workflow.id.0.clone(),
                format!("expected version {expected} but workflow is at {}", workflow.version),
            ));
        }
    }

    if workflow.is_terminal() {
        return Err(WorkflowError::invalid_state(
            step_id.0.clone(),
            format!("workflow is already {}", workflow.status.as_str()),
        ));
    }

    let step = &workflow.steps[index];
    if step.status != StepStatus::InProgress {
        return Err(WorkflowError::invalid_state(
            step_id.0.clone(),
            format!("step is {}, not in_progress", step.status.as_str()),
        ));
    }

    if !step.is_eligible(actor_id) {
        return Err(WorkflowError::InvalidActor {
            step_id: step_id.0.clone(),
            actor_id: actor_id.to_string(),
        });
    }

    Ok(index)
}

pub(crate) fn normalize_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

/// Validated form of a [`DecisionRequest`], produced before anything is touched.
struct PreparedDecision {
    index: usize,
    decision: Decision,
    comments: Option<String>,
    conditions: Option<String>,
    delegate_to: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct DecisionProcessor {
    rules: WorkflowRules,
}

impl DecisionProcessor {
    pub fn new(rules: WorkflowRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &WorkflowRules {
        &self.rules
    }

    /// Applies the decision atomically: on any error the workflow is left
    /// exactly as it was.
    pub fn apply(
        &self,
        workflow: &mut Workflow,
        request: &DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let prepared = self.prepare(workflow, request)?;

        let mut next = workflow.clone();
        commit(&mut next, prepared, now)?;
        next.check_invariants()?;

        *workflow = next;
        Ok(workflow.snapshot())
    }

    fn prepare(
        &self,
        workflow: &Workflow,
        request: &DecisionRequest,
    ) -> Result<PreparedDecision, WorkflowError> {
        let index = authorize_step(
            workflow,
            &request.step_id,
            &request.actor_id,
            request.expected_version,
        )?;

        let comments = normalize_text(request.comments.as_deref());
        let conditions = normalize_text(request.conditions.as_deref());

        if let Some(comments) = &comments {
            let length = comments.chars().count();
            if length > self.rules.max_comment_length {
                return Err(WorkflowError::validation(
                    "comments",
                    format!(
                        "{length} characters exceeds the limit of {}",
                        self.rules.max_comment_length
                    ),
                ));
            }
        }

        match request.decision {
            Decision::Rejected if comments.is_none() => {
                return Err(WorkflowError::validation(
                    "comments",
                    "a rejection must state a reason",
                ));
            }
            Decision::RequestInfo
                if comments.is_none() && self.rules.require_request_info_comments =>
            {
                return Err(WorkflowError::validation(
                    "comments",
                    "an information request must say what is missing",
                ));
            }
            _ => {}
        }

        if conditions.is_some() && request.decision != Decision::Approved {
            return Err(WorkflowError::validation(
                "conditions",
                "conditions can only accompany an approval",
            ));
        }

        let delegate_to = match request.decision {
            Decision::Delegated => {
                let target = request.delegate_to.as_deref().unwrap_or_default();
                Some(validate_delegate_target(&workflow.steps[index], target)?)
            }
            _ => None,
        };

        Ok(PreparedDecision {
            index,
            decision: request.decision,
            comments,
            conditions,
            delegate_to,
        })
    }
}

fn commit(
    workflow: &mut Workflow,
    prepared: PreparedDecision,
    now: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    let PreparedDecision { index, decision, comments, conditions, delegate_to } = prepared;

    let step = &mut workflow.steps[index];
    step.decision = Some(decision);
    step.decision_comments = comments;
    step.decision_timestamp = Some(now);

    match decision {
        Decision::Approved => {
            step.conditions = conditions;
            step.transition_to(StepStatus::Completed)?;
            match workflow.next_waiting_after(index) {
                Some(next) => workflow.steps[next].transition_to(StepStatus::InProgress)?,
                None => workflow.status = WorkflowStatus::Approved,
            }
        }
        Decision::Rejected => {
            step.transition_to(StepStatus::Completed)?;
            workflow.status = WorkflowStatus::Rejected;
        }
        Decision::RequestInfo => {}
        Decision::Delegated => {
            step.delegated_to = delegate_to;
        }
    }

    workflow.version += 1;
    workflow.updated_at = now;
    Ok(())
}
