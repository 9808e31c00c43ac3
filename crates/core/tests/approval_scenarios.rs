use chrono::{Duration, TimeZone, Utc};

use changegate_core::audit::AuditCategory;
use changegate_core::{
    ApprovalEngine, ChangePriority, ChangeRequest, ChangeRequestId, Decision, InMemoryAuditSink,
    StepStatus, StepTemplate, Workflow, WorkflowErrorKind, WorkflowRules, WorkflowStatus,
};

fn engine() -> ApprovalEngine<InMemoryAuditSink> {
    ApprovalEngine::new(WorkflowRules::default(), InMemoryAuditSink::default())
}

fn change_request() -> ChangeRequest {
    ChangeRequest {
        id: ChangeRequestId("CR-1001".to_string()),
        title: "Rotate production TLS certificates".to_string(),
        description: "Replace certificates that expire next month".to_string(),
        priority: ChangePriority::Medium,
        category: "security".to_string(),
        requester: "user-0".to_string(),
        submitted_at: Utc::now(),
    }
}

fn submit_three_steps(engine: &ApprovalEngine<InMemoryAuditSink>) -> Workflow {
    engine
        .submit_workflow(
            change_request(),
            &[
                StepTemplate::new("user-1", "Network lead"),
                StepTemplate::new("user-2", "Security officer"),
                StepTemplate::new("user-3", "Change manager"),
            ],
        )
        .expect("three-step workflow is valid")
}

#[test]
fn two_of_three_approvals_report_sixty_six_percent() {
    let engine = engine();
    let workflow = submit_three_steps(&engine);

    engine
        .apply_decision(&workflow.steps[0].id, Decision::Approved, "user-1", None, None)
        .expect("step one approved");
    engine
        .apply_decision(&workflow.steps[1].id, Decision::Approved, "user-2", Some("lgtm"), None)
        .expect("step two approved");

    let summary = engine.summary(&workflow.id).expect("summary");
    assert_eq!(summary.progress_percentage, 66);
    assert_eq!(summary.overall_status, WorkflowStatus::Pending);
    assert_eq!(summary.active_step_id.as_ref(), Some(&workflow.steps[2].id));
}

#[test]
fn final_approval_completes_the_workflow() {
    let engine = engine();
    let workflow = submit_three_steps(&engine);

    for (index, actor) in ["user-1", "user-2", "user-3"].iter().enumerate() {
        engine
            .apply_decision(&workflow.steps[index].id, Decision::Approved, actor, None, None)
            .expect("approval accepted");
    }

    let stored = engine.workflow(&workflow.id).expect("stored");
    assert_eq!(stored.status, WorkflowStatus::Approved);
    assert!(stored.steps.iter().all(|step| step.status == StepStatus::Completed));

    let summary = engine.get_summary(&stored);
    assert_eq!(summary.progress_percentage, 100);
    assert!(summary.active_step_id.is_none());
}

#[test]
fn rejection_with_reason_terminates_and_blocks_later_decisions() {
    let engine = engine();
    let workflow = submit_three_steps(&engine);

    engine
        .apply_decision(&workflow.steps[0].id, Decision::Approved, "user-1", None, None)
        .expect("step one approved");
    let snapshot = engine
        .apply_decision(
            &workflow.steps[1].id,
            Decision::Rejected,
            "user-2",
            Some("Rollback plan is missing"),
            None,
        )
        .expect("rejection accepted");

    assert_eq!(snapshot.status, WorkflowStatus::Rejected);
    assert_eq!(snapshot.steps[2].status, StepStatus::Waiting);

    let error = engine
        .apply_decision(&workflow.steps[2].id, Decision::Approved, "user-3", None, None)
        .expect_err("workflow already rejected");
    assert_eq!(error.kind(), WorkflowErrorKind::InvalidState);
}

#[test]
fn rejection_without_comments_changes_nothing() {
    let engine = engine();
    let workflow = submit_three_steps(&engine);

    let error = engine
        .apply_decision(&workflow.steps[0].id, Decision::Rejected, "user-1", Some("   "), None)
        .expect_err("blank reason");
    assert_eq!(error.kind(), WorkflowErrorKind::Validation);

    let stored = engine.workflow(&workflow.id).expect("stored");
    assert_eq!(stored, workflow);
}

#[test]
fn request_info_keeps_the_step_open() {
    let engine = engine();
    let workflow = submit_three_steps(&engine);

    let snapshot = engine
        .apply_decision(
            &workflow.steps[0].id,
            Decision::RequestInfo,
            "user-1",
            Some("Which regions are affected?"),
            None,
        )
        .expect("request info accepted");

    assert_eq!(snapshot.status, WorkflowStatus::Pending);
    assert_eq!(snapshot.steps[0].status, StepStatus::InProgress);
    assert_eq!(snapshot.steps[0].decision, Some(Decision::RequestInfo));

    engine
        .apply_decision(&workflow.steps[0].id, Decision::Approved, "user-1", None, None)
        .expect("approver can still decide");
}

#[test]
fn delegation_lets_both_parties_act_but_nobody_else() {
    let engine = engine();
    let workflow = submit_three_steps(&engine);
    let first = workflow.steps[0].id.clone();

    engine.delegate(&first, "user-1", "user-3").expect("delegation accepted");

    let stranger = engine
        .apply_decision(&first, Decision::Approved, "user-9", None, None)
        .expect_err("user-9 is not eligible");
    assert_eq!(stranger.kind(), WorkflowErrorKind::InvalidActor);

    let snapshot = engine
        .apply_decision(&first, Decision::Approved, "user-3", None, None)
        .expect("delegate approves");
    assert_eq!(snapshot.steps[0].delegated_to.as_deref(), Some("user-3"));
    assert_eq!(snapshot.steps[1].status, StepStatus::InProgress);
}

#[test]
fn wrong_actor_and_waiting_step_are_rejected() {
    let engine = engine();
    let workflow = submit_three_steps(&engine);

    let wrong_actor = engine
        .apply_decision(&workflow.steps[0].id, Decision::Approved, "user-2", None, None)
        .expect_err("user-2 does not own step one");
    assert_eq!(wrong_actor.kind(), WorkflowErrorKind::InvalidActor);

    let waiting = engine
        .apply_decision(&workflow.steps[1].id, Decision::Approved, "user-2", None, None)
        .expect_err("step two is not active yet");
    assert_eq!(waiting.kind(), WorkflowErrorKind::InvalidState);
}

#[test]
fn overdue_steps_are_reported_relative_to_now() {
    let engine = engine();
    let workflow = engine
        .submit_workflow(
            change_request(),
            &[
                StepTemplate::new("user-1", "Network lead").with_sla_days(1),
                StepTemplate::new("user-2", "Security officer").with_sla_days(10),
            ],
        )
        .expect("two-step workflow is valid");
    let late = workflow.steps[0].due_date + Duration::days(1);

    let summary = engine.summary_at(&workflow, late);
    assert_eq!(summary.overdue_steps.len(), 1);
    assert_eq!(summary.overdue_steps[0].step_id, workflow.steps[0].id);

    let early = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single().expect("valid timestamp");
    assert!(engine.summary_at(&workflow, early).overdue_steps.is_empty());
}

#[test]
fn every_committed_change_is_announced_once() {
    let engine = engine();
    let workflow = submit_three_steps(&engine);

    engine.delegate(&workflow.steps[0].id, "user-1", "user-5").expect("delegate");
    engine
        .apply_decision(&workflow.steps[0].id, Decision::Approved, "user-5", None, None)
        .expect("approve");
    let _ = engine.apply_decision(&workflow.steps[0].id, Decision::Approved, "user-5", None, None);

    let events = engine.sink().events();
    let categories: Vec<AuditCategory> = events.iter().map(|event| event.category).collect();
    assert_eq!(
        categories,
        vec![AuditCategory::Submission, AuditCategory::Delegation, AuditCategory::Decision]
    );
    assert!(events.iter().all(|event| event.workflow_id.as_ref() == Some(&workflow.id)));
}
