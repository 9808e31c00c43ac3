use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::change_request::ChangeRequest;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Waiting,
    InProgress,
    Completed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "waiting" => Some(Self::Waiting),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    RequestInfo,
    Delegated,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::RequestInfo => "request_info",
            Self::Delegated => "delegated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            "request_info" => Some(Self::RequestInfo),
            "delegated" | "delegate" => Some(Self::Delegated),
            _ => None,
        }
    }

    /// Annotations leave the step in progress; only approve and reject close it.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub sequence_number: u32,
    pub approver_id: String,
    pub approver_name: String,
    pub status: StepStatus,
    pub due_date: DateTime<Utc>,
    pub decision: Option<Decision>,
    pub decision_comments: Option<String>,
    pub decision_timestamp: Option<DateTime<Utc>>,
    pub conditions: Option<String>,
    pub delegated_to: Option<String>,
}

impl ApprovalStep {
    /// The original approver and the current delegate both hold decision authority.
    pub fn is_eligible(&self, actor_id: &str) -> bool {
        let actor_id = actor_id.trim();
        if actor_id.is_empty() {
            return false;
        }
        self.approver_id == actor_id || self.delegated_to.as_deref() == Some(actor_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub change_request: ChangeRequest,
    pub steps: Vec<ApprovalStep>,
    pub status: WorkflowStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn step(&self, step_id: &StepId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| &step.id == step_id)
    }

    pub(crate) fn step_index(&self, step_id: &StepId) -> Option<usize> {
        self.steps.iter().position(|step| &step.id == step_id)
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot::from(self)
    }
}

/// Read-only projection handed back after a successful mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub workflow_id: WorkflowId,
    pub change_request_id: String,
    pub status: WorkflowStatus,
    pub version: u64,
    pub active_step_id: Option<StepId>,
    pub steps: Vec<ApprovalStep>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowSnapshot {
    pub fn step(&self, step_id: &StepId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| &step.id == step_id)
    }
}

impl From<&Workflow> for WorkflowSnapshot {
    fn from(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            change_request_id: workflow.change_request.id.0.clone(),
            status: workflow.status,
            version: workflow.version,
            active_step_id: workflow.active_step().map(|step| step.id.clone()),
            steps: workflow.steps.clone(),
            updated_at: workflow.updated_at,
        }
    }
}
