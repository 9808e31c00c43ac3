pub mod config;
pub mod decide;
pub mod delegate;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod submit;
pub mod summary;

use std::future::Future;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use changegate_core::config::{AppConfig, LoadOptions};
use changegate_core::domain::workflow::{StepId, Workflow, WorkflowId};
use changegate_core::errors::{ApplicationError, WorkflowError, WorkflowErrorKind};
use changegate_core::{
    ApprovalEngine, AuditSink, BufferedAuditSink, TracingAuditSink, WorkflowRules,
};
use changegate_db::{
    connect_with_config, migrations, DbPool, RepositoryError, SqlWorkflowRepository,
    WorkflowRepository,
};

/// `(error_class, message, exit_code)` of a failed command.
pub type Failure = (&'static str, String, u8);

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn from_failure(command: &str, (error_class, message, exit_code): Failure) -> Self {
        Self::failure(command, error_class, message, exit_code)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Notifications raised by the engine wait in the buffer until the change
/// that produced them has been saved.
pub type SessionEngine = ApprovalEngine<BufferedAuditSink<TracingAuditSink>>;

/// Everything a workflow command needs once configuration and storage are up.
pub struct Session {
    pub config: AppConfig,
    pub pool: DbPool,
    pub repository: SqlWorkflowRepository,
    pub engine: SessionEngine,
    pub correlation_id: String,
}

/// Loads config, opens (and migrates) the database, then runs `work` on a
/// single-threaded runtime. Every failure is classified into a `Failure`.
pub fn run_with_session<T, F, Fut>(command: &'static str, work: F) -> Result<T, Failure>
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        ("config_validation", format!("configuration issue: {error}"), 2u8)
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(
        |error| ("runtime_init", format!("failed to initialize async runtime: {error}"), 3u8),
    )?;

    runtime.block_on(async move {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let correlation_id = format!("cli-{}", Uuid::new_v4());
        tracing::debug!(
            event_name = "cli.session_opened",
            correlation_id = %correlation_id,
            command,
            "workflow session opened"
        );

        let session = Session {
            engine: ApprovalEngine::new(
                WorkflowRules::from(&config.workflow),
                BufferedAuditSink::new(TracingAuditSink),
            ),
            repository: SqlWorkflowRepository::new(pool.clone()),
            pool: pool.clone(),
            config,
            correlation_id,
        };
        let result = work(session).await;
        pool.close().await;
        result
    })
}

/// Classifies an application error into the CLI's error class and exit code.
pub fn classify(
    command: &'static str,
    correlation_id: &str,
    error: impl Into<ApplicationError>,
) -> Failure {
    let error = error.into();
    let message = error.to_string();
    let (error_class, exit_code) = match &error {
        ApplicationError::Workflow(workflow_error) => match workflow_error.kind() {
            WorkflowErrorKind::NotFound => (workflow_error.kind().as_str(), 6u8),
            kind => (kind.as_str(), 7u8),
        },
        ApplicationError::Conflict(_) => ("persistence_conflict", 8u8),
        ApplicationError::Persistence(_) => ("persistence", 4u8),
        ApplicationError::Configuration(_) => ("config_validation", 2u8),
    };

    let interface = error.into_interface(correlation_id);
    tracing::warn!(
        event_name = "cli.command_failed",
        correlation_id = %interface.correlation_id(),
        command,
        error_class,
        user_message = interface.user_message(),
        error = %interface,
        "workflow command failed"
    );

    (error_class, message, exit_code)
}

/// Loads the workflow owning `step_id` and hands it to the session engine.
pub(crate) async fn checkout_step(
    session: &Session,
    command: &'static str,
    step_id: &StepId,
) -> Result<Workflow, Failure> {
    let workflow = session
        .repository
        .find_by_step_id(step_id)
        .await
        .map_err(|error| classify(command, &session.correlation_id, error))?
        .ok_or_else(|| {
            classify(
                command,
                &session.correlation_id,
                WorkflowError::NotFound { entity: "step", id: step_id.0.clone() },
            )
        })?;
    session
        .engine
        .register(workflow.clone())
        .map_err(|error| classify(command, &session.correlation_id, error))?;
    Ok(workflow)
}

/// Persists the engine's copy of a workflow checked out at `loaded_version`.
pub(crate) async fn commit(
    session: &Session,
    command: &'static str,
    workflow_id: &WorkflowId,
    loaded_version: u64,
) -> Result<Workflow, Failure> {
    let current = session.engine.workflow(workflow_id).ok_or_else(|| {
        classify(
            command,
            &session.correlation_id,
            WorkflowError::NotFound { entity: "workflow", id: workflow_id.0.clone() },
        )
    })?;
    persist(&session.engine, &session.repository, &current, Some(loaded_version))
        .await
        .map_err(|error| classify(command, &session.correlation_id, error))?;
    Ok(current)
}

/// Saves `workflow`, then releases the engine's buffered notifications. A
/// failed save drops them, so nothing announces a change that was not stored.
pub(crate) async fn persist<S, R>(
    engine: &ApprovalEngine<BufferedAuditSink<S>>,
    repository: &R,
    workflow: &Workflow,
    expected_version: Option<u64>,
) -> Result<(), RepositoryError>
where
    S: AuditSink,
    R: WorkflowRepository,
{
    match repository.save(workflow, expected_version).await {
        Ok(()) => {
            engine.sink().flush();
            Ok(())
        }
        Err(error) => {
            let dropped = engine.sink().discard();
            tracing::debug!(
                event_name = "cli.notifications_dropped",
                workflow_id = %workflow.id.0,
                dropped,
                "save failed; buffered notifications dropped"
            );
            Err(error)
        }
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|error| ("serialization", error.to_string(), 11u8))
}
