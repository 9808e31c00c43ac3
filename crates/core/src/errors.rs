use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowErrorKind {
    Validation,
    InvalidActor,
    InvalidState,
    NotFound,
    InvariantViolation,
}

impl WorkflowErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::InvalidActor => "invalid_actor",
            Self::InvalidState => "invalid_state",
            Self::NotFound => "not_found",
            Self::InvariantViolation => "invariant_violation",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("actor `{actor_id}` has no decision authority for step `{step_id}`")]
    InvalidActor { step_id: String, actor_id: String },
    #[error("`{target}` is not in a decidable state: {reason}")]
    InvalidState { target: String, reason: String },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("workflow invariant violation: {0}")]
    InvariantViolation(String),
}

impl WorkflowError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn invalid_state(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState { target: target.into(), reason: reason.into() }
    }

    pub fn kind(&self) -> WorkflowErrorKind {
        match self {
            Self::Validation { .. } => WorkflowErrorKind::Validation,
            Self::InvalidActor { .. } => WorkflowErrorKind::InvalidActor,
            Self::InvalidState { .. } => WorkflowErrorKind::InvalidState,
            Self::NotFound { .. } => WorkflowErrorKind::NotFound,
            Self::InvariantViolation(_) => WorkflowErrorKind::InvariantViolation,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The action could not be applied. Check the decision details and try again."
            }
            Self::Forbidden { .. } => "You are not an eligible approver for this step.",
            Self::NotFound { .. } => "The requested workflow or step does not exist.",
            Self::Conflict { .. } => {
                "The workflow changed while your action was in flight. Reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Workflow(error) => {
                let message = error.to_string();
                match error.kind() {
                    WorkflowErrorKind::Validation | WorkflowErrorKind::InvalidState => {
                        Self::BadRequest { message, correlation_id }
                    }
                    WorkflowErrorKind::InvalidActor => Self::Forbidden { message, correlation_id },
                    WorkflowErrorKind::NotFound => Self::NotFound { message, correlation_id },
                    WorkflowErrorKind::InvariantViolation => {
                        Self::Internal { message, correlation_id }
                    }
                }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
