use serde_json::json;

use changegate_core::domain::workflow::{Decision, StepId};
use changegate_core::workflow::DecisionRequest;

use crate::commands::{checkout_step, classify, commit, run_with_session, to_data, CommandResult};

#[derive(Debug, Clone)]
pub struct DecideArgs {
    pub step_id: String,
    pub decision: String,
    pub actor_id: String,
    pub comments: Option<String>,
    pub conditions: Option<String>,
    pub delegate_to: Option<String>,
}

pub fn run(args: DecideArgs) -> CommandResult {
    let Some(decision) = Decision::parse(&args.decision) else {
        return CommandResult::failure(
            "decide",
            "validation_error",
            format!(
                "unknown decision `{}` (expected approved|rejected|request_info|delegated)",
                args.decision
            ),
            7,
        );
    };

    let result = run_with_session("decide", |session| async move {
        let step_id = StepId(args.step_id);
        let loaded = checkout_step(&session, "decide", &step_id).await?;

        let mut request = DecisionRequest::new(step_id, decision, args.actor_id)
            .at_version(loaded.version);
        request.comments = args.comments;
        request.conditions = args.conditions;
        request.delegate_to = args.delegate_to;

        let snapshot = session
            .engine
            .apply_request(&request)
            .map_err(|error| classify("decide", &session.correlation_id, error))?;
        commit(&session, "decide", &loaded.id, loaded.version).await?;

        Ok(json!({
            "decision": decision.as_str(),
            "snapshot": to_data(&snapshot)?,
        }))
    });

    match result {
        Ok(data) => CommandResult::success_with_data(
            "decide",
            format!("recorded `{}` decision", decision.as_str()),
            Some(data),
        ),
        Err(failure) => CommandResult::from_failure("decide", failure),
    }
}
