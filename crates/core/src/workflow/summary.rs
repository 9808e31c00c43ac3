use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::{
    ApprovalStep, Decision, StepId, StepStatus, Workflow, WorkflowId, WorkflowStatus,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueStep {
    pub step_id: StepId,
    pub sequence_number: u32,
    pub approver_id: String,
    pub due_date: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: WorkflowId,
    pub progress_percentage: u8,
    pub overall_status: WorkflowStatus,
    pub overdue_steps: Vec<OverdueStep>,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub active_step_id: Option<StepId>,
}

pub fn is_overdue(step: &ApprovalStep, now: DateTime<Utc>) -> bool {
    step.due_date < now && step.status != StepStatus::Completed
}

/// `floor(completed / total * 100)`, computed in integers.
pub fn progress_percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let percentage = completed.min(total) * 100 / total;
    u8::try_from(percentage).unwrap_or(100)
}

/// Derives the overall disposition from step decisions alone, independent of
/// the status stored on the workflow.
pub fn overall_status(steps: &[ApprovalStep]) -> WorkflowStatus {
    if steps.iter().any(|step| step.decision == Some(Decision::Rejected)) {
        return WorkflowStatus::Rejected;
    }

    let mut considered = steps.iter().filter(|step| step.status != StepStatus::Skipped).peekable();
    if considered.peek().is_none() {
        return WorkflowStatus::Pending;
    }
    let all_approved = considered.all(|step| {
        step.status == StepStatus::Completed && step.decision == Some(Decision::Approved)
    });

    if all_approved {
        WorkflowStatus::Approved
    } else {
        WorkflowStatus::Pending
    }
}

/// Read-only projection for display. Holds no state, so repeated calls on an
/// unchanged workflow are identical.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkflowAggregator;

impl WorkflowAggregator {
    pub fn summarize(&self, workflow: &Workflow, now: DateTime<Utc>) -> WorkflowSummary {
        let total_steps = workflow.steps.len();
        let completed_steps =
            workflow.steps.iter().filter(|step| step.status == StepStatus::Completed).count();
        let overdue_steps = workflow
            .steps
            .iter()
            .filter(|step| is_overdue(step, now))
            .map(|step| OverdueStep {
                step_id: step.id.clone(),
                sequence_number: step.sequence_number,
                approver_id: step.approver_id.clone(),
                due_date: step.due_date,
            })
            .collect();

        WorkflowSummary {
            workflow_id: workflow.id.clone(),
            progress_percentage: progress_percentage(completed_steps, total_steps),
            overall_status: overall_status(&workflow.steps),
            overdue_steps,
            completed_steps,
            total_steps,
            active_step_id: workflow.active_step().map(|step| step.id.clone()),
        }
    }
}
