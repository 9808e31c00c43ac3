//! Randomized decision and delegation sequences against the workflow invariants.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use changegate_core::workflow::{
    DecisionProcessor, DecisionRequest, DelegationManager, DelegationRequest, WorkflowAggregator,
};
use changegate_core::{
    ChangePriority, ChangeRequest, ChangeRequestId, Decision, StepStatus, StepTemplate, Workflow,
    WorkflowDefinition, WorkflowId, WorkflowRules, WorkflowStatus,
};

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
enum Actor {
    Approver,
    CurrentDelegate,
    Stranger,
}

#[derive(Clone, Debug)]
enum Action {
    Approve { conditions: bool },
    Reject { with_reason: bool },
    RequestInfo,
    DelegatedDecision { target: usize },
    Delegate { target: usize },
}

#[derive(Clone, Debug)]
struct Operation {
    step: usize,
    actor: Actor,
    action: Action,
}

const DELEGATES: [&str; 3] = ["user-5", "user-6", "user-7"];

fn arb_actor() -> impl Strategy<Value = Actor> {
    prop_oneof![
        3 => Just(Actor::Approver),
        2 => Just(Actor::CurrentDelegate),
        1 => Just(Actor::Stranger),
    ]
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => any::<bool>().prop_map(|conditions| Action::Approve { conditions }),
        1 => any::<bool>().prop_map(|with_reason| Action::Reject { with_reason }),
        2 => Just(Action::RequestInfo),
        1 => (0..DELEGATES.len()).prop_map(|target| Action::DelegatedDecision { target }),
        2 => (0..DELEGATES.len()).prop_map(|target| Action::Delegate { target }),
    ]
}

fn arb_operations() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(
        (0usize..6, arb_actor(), arb_action())
            .prop_map(|(step, actor, action)| Operation { step, actor, action }),
        1..40,
    )
}

fn workflow_with(step_count: usize) -> Workflow {
    let submitted_at = Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).single().expect("timestamp");
    let templates = (1..=step_count)
        .map(|n| StepTemplate::new(format!("user-{n}"), format!("Approver {n}")))
        .collect();
    WorkflowDefinition::new("randomized", templates)
        .instantiate_with_id(
            WorkflowId("wf-prop".to_string()),
            ChangeRequest {
                id: ChangeRequestId("CR-PROP".to_string()),
                title: "Randomized change".to_string(),
                description: String::new(),
                priority: ChangePriority::Low,
                category: "testing".to_string(),
                requester: "user-0".to_string(),
                submitted_at,
            },
            &WorkflowRules::default(),
            submitted_at,
        )
        .expect("valid workflow")
}

/// Runs one operation against `workflow` and reports whether it committed.
fn run(workflow: &mut Workflow, operation: &Operation) -> bool {
    let step = &workflow.steps[operation.step % workflow.steps.len()];
    let step_id = step.id.clone();
    let actor = match operation.actor {
        Actor::Approver => step.approver_id.clone(),
        Actor::CurrentDelegate => {
            step.delegated_to.clone().unwrap_or_else(|| step.approver_id.clone())
        }
        Actor::Stranger => "user-9".to_string(),
    };
    let now = Utc::now();

    let outcome = match &operation.action {
        Action::Approve { conditions } => {
            let mut request = DecisionRequest::new(step_id, Decision::Approved, actor);
            if *conditions {
                request = request.with_conditions("roll back on error");
            }
            DecisionProcessor::default().apply(workflow, &request, now).map(|_| ())
        }
        Action::Reject { with_reason } => {
            let mut request = DecisionRequest::new(step_id, Decision::Rejected, actor);
            if *with_reason {
                request = request.with_comments("design flaw");
            }
            DecisionProcessor::default().apply(workflow, &request, now).map(|_| ())
        }
        Action::RequestInfo => DecisionProcessor::default()
            .apply(workflow, &DecisionRequest::new(step_id, Decision::RequestInfo, actor), now)
            .map(|_| ()),
        Action::DelegatedDecision { target } => DecisionProcessor::default()
            .apply(
                workflow,
                &DecisionRequest::new(step_id, Decision::Delegated, actor)
                    .delegating_to(DELEGATES[*target]),
                now,
            )
            .map(|_| ()),
        Action::Delegate { target } => DelegationManager
            .delegate(workflow, &DelegationRequest::new(step_id, actor, DELEGATES[*target]), now)
            .map(|_| ()),
    };
    outcome.is_ok()
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Every committed operation leaves a consistent workflow; every refused
    /// one leaves it untouched.
    #[test]
    fn invariants_hold_after_every_operation(
        step_count in 1usize..6,
        operations in arb_operations(),
    ) {
        let mut workflow = workflow_with(step_count);
        prop_assert!(workflow.check_invariants().is_ok());

        for operation in &operations {
            let before = workflow.clone();
            let committed = run(&mut workflow, operation);

            if let Err(error) = workflow.check_invariants() {
                prop_assert!(false, "invariant broken after {:?}: {}", operation, error);
            }
            if committed {
                prop_assert_eq!(workflow.version, before.version + 1);
            } else {
                prop_assert_eq!(&workflow, &before);
            }
        }
    }

    /// Terminal workflows never change again, progress never decreases, and
    /// the overall status agrees with the step records.
    #[test]
    fn terminal_states_are_final_and_progress_is_monotonic(
        step_count in 1usize..6,
        operations in arb_operations(),
    ) {
        let mut workflow = workflow_with(step_count);
        let now = workflow.created_at + Duration::days(1);
        let mut last_progress = WorkflowAggregator.summarize(&workflow, now).progress_percentage;

        for operation in &operations {
            let terminal_before = workflow.status != WorkflowStatus::Pending;
            let before = workflow.clone();
            let committed = run(&mut workflow, operation);

            if terminal_before {
                prop_assert!(!committed, "terminal workflow accepted {:?}", operation);
                prop_assert_eq!(&workflow, &before);
            }

            let summary = WorkflowAggregator.summarize(&workflow, now);
            prop_assert!(summary.progress_percentage >= last_progress);
            last_progress = summary.progress_percentage;
            prop_assert_eq!(summary.overall_status, workflow.status);

            match workflow.status {
                WorkflowStatus::Approved => {
                    prop_assert_eq!(summary.progress_percentage, 100);
                    prop_assert!(workflow
                        .steps
                        .iter()
                        .all(|step| step.decision == Some(Decision::Approved)));
                }
                WorkflowStatus::Rejected => {
                    let rejected = workflow
                        .steps
                        .iter()
                        .position(|step| step.decision == Some(Decision::Rejected))
                        .expect("a rejected workflow has a rejected step");
                    prop_assert!(workflow.steps[rejected + 1..]
                        .iter()
                        .all(|step| step.status == StepStatus::Waiting));
                }
                WorkflowStatus::Pending => {
                    prop_assert!(workflow.active_step().is_some());
                }
            }
        }
    }
}
