use changegate_core::domain::workflow::WorkflowId;
use changegate_core::errors::WorkflowError;
use changegate_db::WorkflowRepository;

use crate::commands::{classify, run_with_session, to_data, CommandResult};

pub fn run(workflow_id: String) -> CommandResult {
    let result = run_with_session("summary", |session| async move {
        let workflow_id = WorkflowId(workflow_id);
        let workflow = session
            .repository
            .find_by_id(&workflow_id)
            .await
            .map_err(|error| classify("summary", &session.correlation_id, error))?
            .ok_or_else(|| {
                classify(
                    "summary",
                    &session.correlation_id,
                    WorkflowError::NotFound { entity: "workflow", id: workflow_id.0.clone() },
                )
            })?;

        to_data(&session.engine.get_summary(&workflow))
    });

    match result {
        Ok(data) => {
            let progress = data["progress_percentage"].as_u64().unwrap_or_default();
            let status = data["overall_status"].as_str().unwrap_or("unknown").to_string();
            CommandResult::success_with_data(
                "summary",
                format!("workflow is {status} ({progress}% complete)"),
                Some(data),
            )
        }
        Err(failure) => CommandResult::from_failure("summary", failure),
    }
}
