use std::collections::HashSet;

use crate::domain::workflow::{ApprovalStep, Decision, StepStatus, Workflow, WorkflowStatus};
use crate::errors::WorkflowError;

impl StepStatus {
    /// `waiting -> in_progress -> completed` is the only path a step takes.
    /// `skipped` is terminal and never entered by the engine.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Waiting, StepStatus::InProgress)
                | (StepStatus::InProgress, StepStatus::Completed)
        )
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

impl ApprovalStep {
    pub fn transition_to(&mut self, next: StepStatus) -> Result<(), WorkflowError> {
        if self.status.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(WorkflowError::invalid_state(
            self.id.0.clone(),
            format!("step cannot move from {} to {}", self.status.as_str(), next.as_str()),
        ))
    }
}

impl Workflow {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn active_step(&self) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.status == StepStatus::InProgress)
    }

    /// Index of the step that should activate after `index`, skipping steps
    /// that were marked skipped.
    pub fn next_waiting_after(&self, index: usize) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, step)| step.status != StepStatus::Skipped)
            .map(|(position, _)| position)
    }

    pub fn check_invariants(&self) -> Result<(), WorkflowError> {
        if self.steps.is_empty() {
            return Err(violation("workflow has no approval steps"));
        }

        let mut seen_ids = HashSet::new();
        let mut previous_sequence = 0;
        for step in &self.steps {
            if !seen_ids.insert(&step.id) {
                return Err(violation(format!("duplicate step id `{}`", step.id.0)));
            }
            if step.sequence_number <= previous_sequence {
                return Err(violation(format!(
                    "step `{}` has sequence number {} after {}",
                    step.id.0, step.sequence_number, previous_sequence
                )));
            }
            previous_sequence = step.sequence_number;
            check_step_record(step)?;
        }

        let in_progress: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.status == StepStatus::InProgress)
            .map(|(index, _)| index)
            .collect();
        let rejected_at = self.steps.iter().position(|step| step.decision == Some(Decision::Rejected));

        match self.status {
            WorkflowStatus::Pending => {
                if rejected_at.is_some() {
                    return Err(violation("pending workflow carries a rejected decision"));
                }
                let [active] = in_progress.as_slice() else {
                    return Err(violation(format!(
                        "pending workflow must have exactly one step in progress, found {}",
                        in_progress.len()
                    )));
                };
                check_sequence_around(self, *active)
            }
            WorkflowStatus::Approved => {
                let all_approved = self.steps.iter().all(|step| {
                    step.status == StepStatus::Skipped
                        || (step.status == StepStatus::Completed
                            && step.decision == Some(Decision::Approved))
                });
                if !all_approved {
                    return Err(violation("approved workflow has steps that were not approved"));
                }
                Ok(())
            }
            WorkflowStatus::Rejected => {
                if !in_progress.is_empty() {
                    return Err(violation("rejected workflow still has a step in progress"));
                }
                let Some(rejected_at) = rejected_at else {
                    return Err(violation("rejected workflow has no rejected step"));
                };
                check_sequence_around(self, rejected_at)
            }
        }
    }
}

/// Earlier steps must have passed, later steps must not have started.
fn check_sequence_around(workflow: &Workflow, pivot: usize) -> Result<(), WorkflowError> {
    for (index, step) in workflow.steps.iter().enumerate() {
        if index < pivot && !step.status.is_passed() {
            return Err(violation(format!(
                "step `{}` precedes the active step but is {}",
                step.id.0,
                step.status.as_str()
            )));
        }
        if index < pivot && step.decision == Some(Decision::Rejected) {
            return Err(violation(format!("step `{}` rejected before the pivot", step.id.0)));
        }
        if index > pivot && !matches!(step.status, StepStatus::Waiting | StepStatus::Skipped) {
            return Err(violation(format!(
                "step `{}` follows the active step but is {}",
                step.id.0,
                step.status.as_str()
            )));
        }
    }
    Ok(())
}

fn check_step_record(step: &ApprovalStep) -> Result<(), WorkflowError> {
    match step.status {
        StepStatus::Waiting if step.decision.is_some() => Err(violation(format!(
            "waiting step `{}` already carries a decision",
            step.id.0
        ))),
        StepStatus::Completed if !step.decision.is_some_and(|decision| decision.is_final()) => {
            Err(violation(format!(
                "completed step `{}` has no approve or reject decision",
                step.id.0
            )))
        }
        StepStatus::InProgress if step.decision.is_some_and(|decision| decision.is_final()) => {
            Err(violation(format!("step `{}` is in progress after a final decision", step.id.0)))
        }
        _ => Ok(()),
    }
}

fn violation(message: impl Into<String>) -> WorkflowError {
    WorkflowError::InvariantViolation(message.into())
}
