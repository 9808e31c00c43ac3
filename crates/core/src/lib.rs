pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use audit::{AuditEvent, AuditSink, BufferedAuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::change_request::{ChangePriority, ChangeRequest, ChangeRequestId};
pub use domain::workflow::{
    ApprovalStep, Decision, StepId, StepStatus, Workflow, WorkflowId, WorkflowSnapshot,
    WorkflowStatus,
};
pub use errors::{ApplicationError, InterfaceError, WorkflowError, WorkflowErrorKind};
pub use workflow::{
    submit_workflow, ApprovalEngine, DecisionProcessor, DecisionRequest, DelegationManager,
    DelegationRequest, StepTemplate, WorkflowAggregator, WorkflowDefinition, WorkflowRules,
    WorkflowSummary,
};
