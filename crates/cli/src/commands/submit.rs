use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use changegate_core::domain::change_request::{ChangePriority, ChangeRequest, ChangeRequestId};
use changegate_core::workflow::{StepTemplate, WorkflowDefinition};

use crate::commands::{classify, persist, run_with_session, to_data, CommandResult};

/// JSON document accepted by `changegate submit --file`.
#[derive(Debug, Deserialize)]
pub struct Submission {
    #[serde(default = "default_definition_name")]
    pub definition: String,
    pub change_request: ChangeRequestInput,
    pub steps: Vec<StepTemplate>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRequestInput {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: ChangePriority,
    #[serde(default)]
    pub category: String,
    pub requester: String,
    /// Defaults to the time of submission.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

fn default_definition_name() -> String {
    "ad_hoc".to_string()
}

fn default_priority() -> ChangePriority {
    ChangePriority::Medium
}

impl ChangeRequestInput {
    fn into_change_request(self, now: DateTime<Utc>) -> ChangeRequest {
        ChangeRequest {
            id: ChangeRequestId(self.id),
            title: self.title,
            description: self.description,
            priority: self.priority,
            category: self.category,
            requester: self.requester,
            submitted_at: self.submitted_at.unwrap_or(now),
        }
    }
}

pub fn read_submission(path: &Path) -> Result<Submission> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read submission file `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("submission file `{}` is not valid JSON", path.display()))
}

pub fn run(file: PathBuf) -> CommandResult {
    let submission = match read_submission(&file) {
        Ok(submission) => submission,
        Err(error) => {
            return CommandResult::failure("submit", "input_file", format!("{error:#}"), 9);
        }
    };

    let result = run_with_session("submit", |session| async move {
        let definition = WorkflowDefinition::new(submission.definition, submission.steps);
        let change_request = submission.change_request.into_change_request(Utc::now());

        let workflow = session
            .engine
            .submit_definition(&definition, change_request)
            .map_err(|error| classify("submit", &session.correlation_id, error))?;
        persist(&session.engine, &session.repository, &workflow, None)
            .await
            .map_err(|error| classify("submit", &session.correlation_id, error))?;

        let step_ids: Vec<&str> = workflow.steps.iter().map(|step| step.id.0.as_str()).collect();
        Ok(json!({
            "workflow_id": workflow.id.0,
            "status": workflow.status.as_str(),
            "version": workflow.version,
            "step_ids": step_ids,
            "active_step_id": workflow.active_step().map(|step| step.id.0.clone()),
            "steps": to_data(&workflow.steps)?,
        }))
    });

    match result {
        Ok(data) => {
            let workflow_id = data["workflow_id"].as_str().unwrap_or_default().to_string();
            CommandResult::success_with_data(
                "submit",
                format!("submitted approval workflow {workflow_id}"),
                Some(data),
            )
        }
        Err(failure) => CommandResult::from_failure("submit", failure),
    }
}
