use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditSink};
use crate::domain::change_request::ChangeRequest;
use crate::domain::workflow::{Decision, StepId, Workflow, WorkflowId, WorkflowSnapshot};
use crate::errors::WorkflowError;
use crate::workflow::decisions::{DecisionProcessor, DecisionRequest};
use crate::workflow::definition::{StepTemplate, WorkflowDefinition};
use crate::workflow::delegation::{DelegationManager, DelegationRequest};
use crate::workflow::summary::{WorkflowAggregator, WorkflowSummary};
use crate::workflow::WorkflowRules;

type SharedWorkflow = Arc<Mutex<Workflow>>;

#[derive(Default)]
struct Registry {
    workflows: HashMap<WorkflowId, SharedWorkflow>,
    steps: HashMap<StepId, WorkflowId>,
}

/// In-process home of live workflows.
///
/// Each workflow sits behind its own mutex, so decisions and delegations on
/// one workflow are serialized while different workflows proceed in
/// parallel. A writer that loses the race for a step sees the committed
/// state and fails with `InvalidState`.
pub struct ApprovalEngine<S> {
    processor: DecisionProcessor,
    delegation: DelegationManager,
    aggregator: WorkflowAggregator,
    registry: RwLock<Registry>,
    sink: S,
}

impl<S> ApprovalEngine<S>
where
    S: AuditSink,
{
    pub fn new(rules: WorkflowRules, sink: S) -> Self {
        Self {
            processor: DecisionProcessor::new(rules),
            delegation: DelegationManager,
            aggregator: WorkflowAggregator,
            registry: RwLock::new(Registry::default()),
            sink,
        }
    }

    pub fn rules(&self) -> &WorkflowRules {
        self.processor.rules()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn submit_workflow(
        &self,
        change_request: ChangeRequest,
        step_templates: &[StepTemplate],
    ) -> Result<Workflow, WorkflowError> {
        let definition = WorkflowDefinition::new("ad_hoc", step_templates.to_vec());
        self.submit_definition(&definition, change_request)
    }

    pub fn submit_definition(
        &self,
        definition: &WorkflowDefinition,
        change_request: ChangeRequest,
    ) -> Result<Workflow, WorkflowError> {
        let requester = change_request.requester.clone();
        let workflow = definition.instantiate(change_request, self.rules(), Utc::now())?;
        self.insert(workflow.clone())?;

        let context = AuditContext::new(Some(workflow.id.clone()), correlation_id(), requester);
        info!(
            event_name = "workflow.submitted",
            correlation_id = %context.correlation_id,
            workflow_id = %workflow.id.0,
            change_request_id = %workflow.change_request.id.0,
            step_count = workflow.steps.len(),
            "approval workflow submitted"
        );
        self.sink.emit(
            AuditEvent::new(
                &context,
                "workflow.submitted",
                AuditCategory::Submission,
            )
            .with_metadata("definition", definition.name.clone())
            .with_metadata("change_request_id", workflow.change_request.id.0.clone())
            .with_metadata("step_count", workflow.steps.len().to_string()),
        );

        Ok(workflow)
    }

    /// Hands a materialized workflow (for example one loaded from storage) to
    /// the engine, replacing any earlier copy with the same id.
    pub fn register(&self, workflow: Workflow) -> Result<(), WorkflowError> {
        workflow.check_invariants()?;
        self.insert(workflow)
    }

    fn insert(&self, workflow: Workflow) -> Result<(), WorkflowError> {
        let mut registry = write_registry(&self.registry);

        for step in &workflow.steps {
            if let Some(owner) = registry.steps.get(&step.id) {
                if owner != &workflow.id {
                    return Err(WorkflowError::validation(
                        "steps",
                        format!("step id `{}` already belongs to workflow `{}`", step.id.0, owner.0),
                    ));
                }
            }
        }

        let workflow_id = workflow.id.clone();
        registry.steps.retain(|_, owner| owner != &workflow_id);
        for step in &workflow.steps {
            registry.steps.insert(step.id.clone(), workflow_id.clone());
        }
        registry.workflows.insert(workflow_id, Arc::new(Mutex::new(workflow)));
        Ok(())
    }

    pub fn workflow(&self, workflow_id: &WorkflowId) -> Option<Workflow> {
        let shared = read_registry(&self.registry).workflows.get(workflow_id).cloned()?;
        let workflow = lock_workflow(&shared).clone();
        Some(workflow)
    }

    pub fn workflow_ids(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<WorkflowId> =
            read_registry(&self.registry).workflows.keys().cloned().collect();
        ids.sort_by(|left, right| left.0.cmp(&right.0));
        ids
    }

    fn shared_for_step(&self, step_id: &StepId) -> Result<SharedWorkflow, WorkflowError> {
        let registry = read_registry(&self.registry);
        registry
            .steps
            .get(step_id)
            .and_then(|workflow_id| registry.workflows.get(workflow_id))
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound { entity: "step", id: step_id.0.clone() })
    }

    pub fn apply_decision(
        &self,
        step_id: &StepId,
        decision: Decision,
        actor_id: &str,
        comments: Option<&str>,
        conditions: Option<&str>,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let mut request = DecisionRequest::new(step_id.clone(), decision, actor_id);
        request.comments = comments.map(str::to_string);
        request.conditions = conditions.map(str::to_string);
        self.apply_request(&request)
    }

    pub fn apply_request(&self, request: &DecisionRequest) -> Result<WorkflowSnapshot, WorkflowError> {
        let correlation_id = correlation_id();
        let result = self.shared_for_step(&request.step_id).and_then(|shared| {
            let mut workflow = lock_workflow(&shared);
            self.processor.apply(&mut workflow, request, Utc::now())
        });

        match &result {
            Ok(snapshot) => {
                let step = snapshot.step(&request.step_id);
                info!(
                    event_name = "workflow.decision_applied",
                    correlation_id = %correlation_id,
                    workflow_id = %snapshot.workflow_id.0,
                    step_id = %request.step_id.0,
                    actor_id = %request.actor_id,
                    decision = request.decision.as_str(),
                    workflow_status = snapshot.status.as_str(),
                    version = snapshot.version,
                    "approval decision applied"
                );
                let mut event = AuditEvent::new(
                    &AuditContext::new(
                        Some(snapshot.workflow_id.clone()),
                        correlation_id,
                        request.actor_id.clone(),
                    ),
                    "workflow.decision_applied",
                    AuditCategory::Decision,
                )
                .for_step(request.step_id.clone())
                .with_metadata("decision", request.decision.as_str())
                .with_metadata("workflow_status", snapshot.status.as_str())
                .with_metadata("version", snapshot.version.to_string());
                if let Some(comments) = step.and_then(|step| step.decision_comments.clone()) {
                    event = event.with_metadata("comments", comments);
                }
                if let Some(conditions) = step.and_then(|step| step.conditions.clone()) {
                    event = event.with_metadata("conditions", conditions);
                }
                if let Some(delegate) = step.and_then(|step| step.delegated_to.clone()) {
                    event = event.with_metadata("delegated_to", delegate);
                }
                self.sink.emit(event);
            }
            Err(error) => {
                warn!(
                    event_name = "workflow.decision_rejected",
                    correlation_id = %correlation_id,
                    step_id = %request.step_id.0,
                    actor_id = %request.actor_id,
                    decision = request.decision.as_str(),
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "approval decision refused"
                );
            }
        }

        result
    }

    pub fn delegate(
        &self,
        step_id: &StepId,
        actor_id: &str,
        delegate_target: &str,
    ) -> Result<(), WorkflowError> {
        self.delegate_request(&DelegationRequest::new(step_id.clone(), actor_id, delegate_target))
            .map(|_| ())
    }

    pub fn delegate_request(
        &self,
        request: &DelegationRequest,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let correlation_id = correlation_id();
        let result = self.shared_for_step(&request.step_id).and_then(|shared| {
            let mut workflow = lock_workflow(&shared);
            self.delegation.delegate(&mut workflow, request, Utc::now())?;
            Ok(workflow.snapshot())
        });

        match &result {
            Ok(snapshot) => {
                info!(
                    event_name = "workflow.delegated",
                    correlation_id = %correlation_id,
                    workflow_id = %snapshot.workflow_id.0,
                    step_id = %request.step_id.0,
                    actor_id = %request.actor_id,
                    delegate_to = %request.delegate_to.trim(),
                    version = snapshot.version,
                    "approval step delegated"
                );
                self.sink.emit(
                    AuditEvent::new(
                        &AuditContext::new(
                            Some(snapshot.workflow_id.clone()),
                            correlation_id,
                            request.actor_id.clone(),
                        ),
                        "workflow.delegated",
                        AuditCategory::Delegation,
                    )
                    .for_step(request.step_id.clone())
                    .with_metadata("delegated_to", request.delegate_to.trim())
                    .with_metadata("version", snapshot.version.to_string()),
                );
            }
            Err(error) => {
                warn!(
                    event_name = "workflow.delegation_rejected",
                    correlation_id = %correlation_id,
                    step_id = %request.step_id.0,
                    actor_id = %request.actor_id,
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "approval delegation refused"
                );
            }
        }

        result
    }

    pub fn get_summary(&self, workflow: &Workflow) -> WorkflowSummary {
        self.summary_at(workflow, Utc::now())
    }

    pub fn summary_at(&self, workflow: &Workflow, now: DateTime<Utc>) -> WorkflowSummary {
        self.aggregator.summarize(workflow, now)
    }

    pub fn summary(&self, workflow_id: &WorkflowId) -> Result<WorkflowSummary, WorkflowError> {
        let workflow = self.workflow(workflow_id).ok_or_else(|| WorkflowError::NotFound {
            entity: "workflow",
            id: workflow_id.0.clone(),
        })?;
        Ok(self.get_summary(&workflow))
    }
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4())
}

fn lock_workflow(shared: &SharedWorkflow) -> MutexGuard<'_, Workflow> {
    // Mutations commit by whole-value swap, so a poisoned lock still holds a
    // consistent workflow.
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_registry(registry: &RwLock<Registry>) -> std::sync::RwLockReadGuard<'_, Registry> {
    match registry.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_registry(registry: &RwLock<Registry>) -> std::sync::RwLockWriteGuard<'_, Registry> {
    match registry.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::ApprovalEngine;
    use crate::audit::{AuditCategory, InMemoryAuditSink};
    use crate::domain::workflow::{Decision, StepId, StepStatus, WorkflowId, WorkflowStatus};
    use crate::errors::WorkflowErrorKind;
    use crate::workflow::definition::StepTemplate;
    use crate::workflow::test_support::{change_request, three_step_workflow};
    use crate::workflow::WorkflowRules;

    fn engine() -> ApprovalEngine<InMemoryAuditSink> {
        ApprovalEngine::new(WorkflowRules::default(), InMemoryAuditSink::default())
    }

    fn templates() -> Vec<StepTemplate> {
        vec![
            StepTemplate::new("user-1", "Ada"),
            StepTemplate::new("user-2", "Grace"),
            StepTemplate::new("user-3", "Linus"),
        ]
    }

    #[test]
    fn submit_registers_and_notifies() {
        let engine = engine();
        let workflow =
            engine.submit_workflow(change_request(), &templates()).expect("submit workflow");

        assert_eq!(engine.workflow(&workflow.id), Some(workflow.clone()));
        let events = engine.sink().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, AuditCategory::Submission);
        assert_eq!(events[0].workflow_id, Some(workflow.id));
    }

    #[test]
    fn decisions_are_addressed_by_step_id_alone() {
        let engine = engine();
        let workflow = engine.submit_workflow(change_request(), &templates()).expect("submit");
        let first = workflow.steps[0].id.clone();

        let snapshot = engine
            .apply_decision(&first, Decision::Approved, "user-1", None, None)
            .expect("approve step one");
        assert_eq!(snapshot.steps[1].status, StepStatus::InProgress);

        let stored = engine.workflow(&workflow.id).expect("stored");
        assert_eq!(stored.version, 2);
        assert_eq!(engine.sink().events().len(), 2);
    }

    #[test]
    fn unknown_step_is_not_found() {
        let error = engine()
            .apply_decision(&StepId("nope".to_string()), Decision::Approved, "user-1", None, None)
            .expect_err("unknown step");
        assert_eq!(error.kind(), WorkflowErrorKind::NotFound);
    }

    #[test]
    fn refused_decisions_do_not_notify() {
        let engine = engine();
        let workflow = engine.submit_workflow(change_request(), &templates()).expect("submit");

        let error = engine
            .apply_decision(&workflow.steps[0].id, Decision::Rejected, "user-1", Some(""), None)
            .expect_err("blank rejection");
        assert_eq!(error.kind(), WorkflowErrorKind::Validation);
        assert_eq!(engine.sink().events().len(), 1);
    }

    #[test]
    fn delegation_goes_through_engine() {
        let engine = engine();
        let workflow = engine.submit_workflow(change_request(), &templates()).expect("submit");
        let first = workflow.steps[0].id.clone();

        engine.delegate(&first, "user-1", "user-3").expect("delegate");
        engine
            .apply_decision(&first, Decision::Approved, "user-3", None, None)
            .expect("delegate approves");
        let error = engine
            .apply_decision(&workflow.steps[1].id, Decision::Approved, "user-9", None, None)
            .expect_err("stranger");
        assert_eq!(error.kind(), WorkflowErrorKind::InvalidActor);

        let categories: Vec<AuditCategory> =
            engine.sink().events().iter().map(|event| event.category).collect();
        assert_eq!(
            categories,
            vec![AuditCategory::Submission, AuditCategory::Delegation, AuditCategory::Decision]
        );
    }

    #[test]
    fn register_rejects_inconsistent_workflows() {
        let mut workflow = three_step_workflow();
        workflow.steps[1].status = StepStatus::InProgress;

        let error = engine().register(workflow).expect_err("two active steps");
        assert_eq!(error.kind(), WorkflowErrorKind::InvariantViolation);
    }

    #[test]
    fn register_replaces_previous_copy() {
        let engine = engine();
        let workflow = three_step_workflow();
        engine.register(workflow.clone()).expect("register");

        let mut newer = workflow.clone();
        newer.version = 5;
        engine.register(newer).expect("re-register same id");

        assert_eq!(engine.workflow(&workflow.id).map(|stored| stored.version), Some(5));
        assert_eq!(engine.workflow_ids(), vec![WorkflowId(workflow.id.0.clone())]);
    }

    #[test]
    fn concurrent_approvals_of_one_step_commit_exactly_once() {
        let engine = Arc::new(engine());
        let workflow = engine.submit_workflow(change_request(), &templates()).expect("submit");
        engine.delegate(&workflow.steps[0].id, "user-1", "user-7").expect("delegate");

        let handles: Vec<_> = (0..16)
            .map(|attempt| {
                let engine = Arc::clone(&engine);
                let step = workflow.steps[0].id.clone();
                thread::spawn(move || {
                    let actor = if attempt % 2 == 0 { "user-1" } else { "user-7" };
                    engine.apply_decision(&step, Decision::Approved, actor, None, None)
                })
            })
            .collect();

        let results: Vec<_> =
            handles.into_iter().map(|handle| handle.join().expect("thread panicked")).collect();
        let successes = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results
            .iter()
            .filter_map(|result| result.as_ref().err())
            .all(|error| error.kind() == WorkflowErrorKind::InvalidState));

        let stored = engine.workflow(&workflow.id).expect("stored");
        assert_eq!(stored.version, 3);
        assert_eq!(stored.steps[1].status, StepStatus::InProgress);
        assert_eq!(stored.status, WorkflowStatus::Pending);
        stored.check_invariants().expect("no torn state");
    }
}
