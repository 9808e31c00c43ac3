use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::change_request::ChangeRequest;
use crate::domain::workflow::{ApprovalStep, StepId, StepStatus, Workflow, WorkflowId, WorkflowStatus};
use crate::errors::WorkflowError;
use crate::workflow::WorkflowRules;

/// One approval checkpoint as configured before submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub approver_id: String,
    pub approver_name: String,
    /// Absolute due date. Wins over `sla_days` when both are present.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Days after submission the step is due.
    #[serde(default)]
    pub sla_days: Option<u32>,
}

impl StepTemplate {
    pub fn new(approver_id: impl Into<String>, approver_name: impl Into<String>) -> Self {
        Self {
            approver_id: approver_id.into(),
            approver_name: approver_name.into(),
            due_date: None,
            sla_days: None,
        }
    }

    pub fn due_on(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_sla_days(mut self, sla_days: u32) -> Self {
        self.sla_days = Some(sla_days);
        self
    }

    fn resolve_due_date(&self, submitted_at: DateTime<Utc>, default_sla_days: u32) -> DateTime<Utc> {
        if let Some(due_date) = self.due_date {
            return due_date;
        }
        let days = self.sla_days.unwrap_or(default_sla_days);
        submitted_at + Duration::days(i64::from(days))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<StepTemplate>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepTemplate>) -> Self {
        Self { name: name.into(), steps }
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::validation(
                "step_templates",
                "a workflow needs at least one approval step",
            ));
        }

        for (index, template) in self.steps.iter().enumerate() {
            let position = index + 1;
            if template.approver_id.trim().is_empty() {
                return Err(WorkflowError::validation(
                    format!("step_templates[{position}].approver_id"),
                    "must not be blank",
                ));
            }
            if template.approver_name.trim().is_empty() {
                return Err(WorkflowError::validation(
                    format!("step_templates[{position}].approver_name"),
                    "must not be blank",
                ));
            }
        }

        Ok(())
    }

    pub fn instantiate(
        &self,
        change_request: ChangeRequest,
        rules: &WorkflowRules,
        now: DateTime<Utc>,
    ) -> Result<Workflow, WorkflowError> {
        let id = WorkflowId(format!("wf-{}", Uuid::new_v4()));
        self.instantiate_with_id(id, change_request, rules, now)
    }

    /// Step ids are derived from the workflow id, so a caller-chosen workflow
    /// id yields a fully deterministic instance.
    pub fn instantiate_with_id(
        &self,
        id: WorkflowId,
        change_request: ChangeRequest,
        rules: &WorkflowRules,
        now: DateTime<Utc>,
    ) -> Result<Workflow, WorkflowError> {
        if id.0.trim().is_empty() {
            return Err(WorkflowError::validation("workflow.id", "must not be blank"));
        }
        change_request.validate()?;
        self.validate()?;

        let submitted_at = change_request.submitted_at;
        let steps = self
            .steps
            .iter()
            .zip(1u32..)
            .map(|(template, sequence_number)| ApprovalStep {
                id: StepId(format!("{}-s{sequence_number}", id.0)),
                sequence_number,
                approver_id: template.approver_id.trim().to_string(),
                approver_name: template.approver_name.trim().to_string(),
                status: if sequence_number == 1 {
                    StepStatus::InProgress
                } else {
                    StepStatus::Waiting
                },
                due_date: template.resolve_due_date(submitted_at, rules.default_step_sla_days),
                decision: None,
                decision_comments: None,
                decision_timestamp: None,
                conditions: None,
                delegated_to: None,
            })
            .collect();

        Ok(Workflow {
            id,
            change_request,
            steps,
            status: WorkflowStatus::Pending,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Instantiates a workflow for a freshly submitted change request.
pub fn submit_workflow(
    change_request: ChangeRequest,
    step_templates: &[StepTemplate],
    rules: &WorkflowRules,
) -> Result<Workflow, WorkflowError> {
    let definition = WorkflowDefinition::new("ad_hoc", step_templates.to_vec());
    definition.instantiate(change_request, rules, Utc::now())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{submit_workflow, StepTemplate, WorkflowDefinition};
    use crate::domain::workflow::{StepStatus, WorkflowId, WorkflowStatus};
    use crate::errors::WorkflowErrorKind;
    use crate::workflow::test_support::change_request;
    use crate::workflow::WorkflowRules;

    #[test]
    fn instantiation_activates_only_the_first_step() {
        let workflow = submit_workflow(
            change_request(),
            &[
                StepTemplate::new("user-1", "Ada"),
                StepTemplate::new("user-2", "Grace"),
                StepTemplate::new("user-3", "Linus"),
            ],
            &WorkflowRules::default(),
        )
        .expect("valid templates");

        let statuses: Vec<StepStatus> = workflow.steps.iter().map(|step| step.status).collect();
        assert_eq!(statuses, vec![StepStatus::InProgress, StepStatus::Waiting, StepStatus::Waiting]);
        let sequence: Vec<u32> = workflow.steps.iter().map(|step| step.sequence_number).collect();
        assert_eq!(sequence, vec![1, 2, 3]);
        assert_eq!(workflow.status, WorkflowStatus::Pending);
        assert_eq!(workflow.version, 1);
        assert!(workflow.id.0.starts_with("wf-"));
        workflow.check_invariants().expect("consistent");
    }

    #[test]
    fn empty_template_list_is_a_validation_error() {
        let error = submit_workflow(change_request(), &[], &WorkflowRules::default())
            .expect_err("no steps");
        assert_eq!(error.kind(), WorkflowErrorKind::Validation);
    }

    #[test]
    fn blank_approver_is_a_validation_error() {
        let error = submit_workflow(
            change_request(),
            &[StepTemplate::new("user-1", "Ada"), StepTemplate::new("  ", "Nobody")],
            &WorkflowRules::default(),
        )
        .expect_err("blank approver");

        assert!(error.to_string().contains("step_templates[2].approver_id"));
    }

    #[test]
    fn due_dates_resolve_explicit_then_sla_then_default() {
        let mut request = change_request();
        let submitted_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("date");
        request.submitted_at = submitted_at;
        let explicit = Utc.with_ymd_and_hms(2026, 3, 20, 17, 0, 0).single().expect("date");

        let rules = WorkflowRules { default_step_sla_days: 5, ..WorkflowRules::default() };
        let workflow = WorkflowDefinition::new(
            "standard_change",
            vec![
                StepTemplate::new("user-1", "Ada").due_on(explicit).with_sla_days(1),
                StepTemplate::new("user-2", "Grace").with_sla_days(2),
                StepTemplate::new("user-3", "Linus"),
            ],
        )
        .instantiate_with_id(WorkflowId("wf-fixed".to_string()), request, &rules, submitted_at)
        .expect("valid definition");

        assert_eq!(workflow.steps[0].due_date, explicit);
        assert_eq!(workflow.steps[1].due_date, submitted_at + Duration::days(2));
        assert_eq!(workflow.steps[2].due_date, submitted_at + Duration::days(5));
        assert_eq!(workflow.steps[1].id.0, "wf-fixed-s2");
    }
}
