pub mod decisions;
pub mod definition;
pub mod delegation;
pub mod engine;
pub mod state_machine;
pub mod summary;

pub use decisions::{DecisionProcessor, DecisionRequest};
pub use definition::{submit_workflow, StepTemplate, WorkflowDefinition};
pub use delegation::{DelegationManager, DelegationRequest};
pub use engine::ApprovalEngine;
pub use summary::{OverdueStep, WorkflowAggregator, WorkflowSummary};

use crate::config::WorkflowConfig;

/// Tunables the engine enforces on top of the fixed approval rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowRules {
    pub default_step_sla_days: u32,
    pub max_comment_length: usize,
    pub require_request_info_comments: bool,
}

impl Default for WorkflowRules {
    fn default() -> Self {
        Self {
            default_step_sla_days: 3,
            max_comment_length: 2_000,
            require_request_info_comments: false,
        }
    }
}

impl From<&WorkflowConfig> for WorkflowRules {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            default_step_sla_days: config.default_step_sla_days,
            max_comment_length: config.max_comment_length,
            require_request_info_comments: config.require_request_info_comments,
        }
    }
}
