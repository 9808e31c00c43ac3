use changegate_core::domain::workflow::StepId;
use changegate_core::workflow::DelegationRequest;

use crate::commands::{checkout_step, classify, commit, run_with_session, to_data, CommandResult};

pub fn run(step_id: String, actor_id: String, delegate_to: String) -> CommandResult {
    let target = delegate_to.trim().to_string();
    let result = run_with_session("delegate", |session| async move {
        let step_id = StepId(step_id);
        let loaded = checkout_step(&session, "delegate", &step_id).await?;

        let request =
            DelegationRequest::new(step_id, actor_id, delegate_to).at_version(loaded.version);
        let snapshot = session
            .engine
            .delegate_request(&request)
            .map_err(|error| classify("delegate", &session.correlation_id, error))?;
        commit(&session, "delegate", &loaded.id, loaded.version).await?;

        to_data(&snapshot)
    });

    match result {
        Ok(data) => CommandResult::success_with_data(
            "delegate",
            format!("step delegated to {target}"),
            Some(data),
        ),
        Err(failure) => CommandResult::from_failure("delegate", failure),
    }
}
