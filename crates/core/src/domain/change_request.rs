use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRequestId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ChangePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// A submitted change request. Never mutated after submission; all state
/// changes happen on the approval workflow that gates it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: ChangeRequestId,
    pub title: String,
    pub description: String,
    pub priority: ChangePriority,
    pub category: String,
    pub requester: String,
    pub submitted_at: DateTime<Utc>,
}

impl ChangeRequest {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.id.0.trim().is_empty() {
            return Err(WorkflowError::validation("change_request.id", "must not be blank"));
        }
        if self.title.trim().is_empty() {
            return Err(WorkflowError::validation("change_request.title", "must not be blank"));
        }
        if self.requester.trim().is_empty() {
            return Err(WorkflowError::validation(
                "change_request.requester",
                "must not be blank",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ChangePriority, ChangeRequest, ChangeRequestId};
    use crate::errors::WorkflowErrorKind;

    fn request() -> ChangeRequest {
        ChangeRequest {
            id: ChangeRequestId("CR-1".to_string()),
            title: "Swap primary database".to_string(),
            description: String::new(),
            priority: ChangePriority::High,
            category: "infrastructure".to_string(),
            requester: "user-1".to_string(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!(ChangePriority::parse(" Critical "), Some(ChangePriority::Critical));
        assert_eq!(ChangePriority::parse("urgent"), None);
        assert_eq!(ChangePriority::Medium.as_str(), "medium");
    }

    #[test]
    fn blank_title_is_rejected() {
        let mut request = request();
        request.title = "   ".to_string();

        let error = request.validate().expect_err("blank title should fail");
        assert_eq!(error.kind(), WorkflowErrorKind::Validation);
    }

    #[test]
    fn empty_description_is_allowed() {
        request().validate().expect("description is optional");
    }
}
