use crate::commands::{run_with_session, CommandResult};

pub fn run() -> CommandResult {
    let result = run_with_session("migrate", |_session| async move { Ok(()) });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
