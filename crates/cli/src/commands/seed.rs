use serde_json::json;

use changegate_db::DemoSeedDataset;

use crate::commands::{run_with_session, CommandResult, Failure};

const SEED_EXIT_CODE: u8 = 10;

fn seed_failure(error_class: &'static str, message: String) -> Failure {
    (error_class, message, SEED_EXIT_CODE)
}

pub fn run() -> CommandResult {
    let result = run_with_session("seed", |session| async move {
        let seed_result = DemoSeedDataset::load(&session.pool)
            .await
            .map_err(|error| seed_failure("seed_execution", error.to_string()))?;

        let verification = DemoSeedDataset::verify(&session.pool)
            .await
            .map_err(|error| seed_failure("seed_verification", error.to_string()))?;

        if !verification.all_present {
            return Err(seed_failure(
                "seed_verification",
                verification_failure_message(&verification.checks),
            ));
        }

        Ok(seed_result)
    });

    match result {
        Ok(seed) => CommandResult::success_with_data(
            "seed",
            format!(
                "demo approval workflow {} loaded: step {} approved, step {} awaiting user-2",
                seed.workflow_id,
                seed.step_ids.first().map(String::as_str).unwrap_or("?"),
                seed.step_ids.get(1).map(String::as_str).unwrap_or("?"),
            ),
            Some(json!({
                "workflow_id": seed.workflow_id,
                "step_ids": seed.step_ids,
                "version": seed.version,
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
