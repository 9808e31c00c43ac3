use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use changegate_core::domain::change_request::{ChangePriority, ChangeRequest, ChangeRequestId};
use changegate_core::domain::workflow::{
    ApprovalStep, Decision, StepId, StepStatus, Workflow, WorkflowId, WorkflowStatus,
};

use super::{RepositoryError, WorkflowRepository};
use crate::DbPool;

const WORKFLOW_COLUMNS: &str = "w.id, w.status, w.version, w.created_at, w.updated_at,
        c.id AS change_request_id, c.title, c.description, c.priority, c.category,
        c.requester, c.submitted_at";

const STEP_COLUMNS: &str = "id, sequence_number, approver_id, approver_name, status, due_date,
        decision, decision_comments, decision_timestamp, conditions, delegated_to";

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_steps(&self, workflow_id: &str) -> Result<Vec<ApprovalStep>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_step WHERE workflow_id = ? ORDER BY sequence_number"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_step).collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<Workflow, RepositoryError> {
        let mut workflow = row_to_workflow(row)?;
        workflow.steps = self.load_steps(&workflow.id.0).await?;
        Ok(workflow)
    }
}

fn decode<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: invalid timestamp `{value}`: {e}")))
}

fn parse_version(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("version: negative value {value}")))
}

fn encode_version(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("version: {version} does not fit in SQLite")))
}

fn row_to_workflow(row: &SqliteRow) -> Result<Workflow, RepositoryError> {
    let status: String = decode(row, "status")?;
    let priority: String = decode(row, "priority")?;
    let submitted_at: String = decode(row, "submitted_at")?;
    let created_at: String = decode(row, "created_at")?;
    let updated_at: String = decode(row, "updated_at")?;

    let change_request = ChangeRequest {
        id: ChangeRequestId(decode(row, "change_request_id")?),
        title: decode(row, "title")?,
        description: decode(row, "description")?,
        priority: ChangePriority::parse(&priority)
            .ok_or_else(|| RepositoryError::Decode(format!("priority: unknown `{priority}`")))?,
        category: decode(row, "category")?,
        requester: decode(row, "requester")?,
        submitted_at: parse_timestamp("submitted_at", &submitted_at)?,
    };

    Ok(Workflow {
        id: WorkflowId(decode(row, "id")?),
        change_request,
        steps: Vec::new(),
        status: WorkflowStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("status: unknown `{status}`")))?,
        version: parse_version(decode(row, "version")?)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let status: String = decode(row, "status")?;
    let due_date: String = decode(row, "due_date")?;
    let decision: Option<String> = decode(row, "decision")?;
    let decision_timestamp: Option<String> = decode(row, "decision_timestamp")?;
    let sequence_number: i64 = decode(row, "sequence_number")?;

    let decision = decision
        .map(|value| {
            Decision::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("decision: unknown `{value}`")))
        })
        .transpose()?;
    let decision_timestamp = decision_timestamp
        .map(|value| parse_timestamp("decision_timestamp", &value))
        .transpose()?;

    Ok(ApprovalStep {
        id: StepId(decode(row, "id")?),
        sequence_number: u32::try_from(sequence_number).map_err(|_| {
            RepositoryError::Decode(format!("sequence_number: out of range {sequence_number}"))
        })?,
        approver_id: decode(row, "approver_id")?,
        approver_name: decode(row, "approver_name")?,
        status: StepStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("step status: unknown `{status}`")))?,
        due_date: parse_timestamp("due_date", &due_date)?,
        decision,
        decision_comments: decode(row, "decision_comments")?,
        decision_timestamp,
        conditions: decode(row, "conditions")?,
        delegated_to: decode(row, "delegated_to")?,
    })
}

async fn stored_version(
    tx: &mut Transaction<'_, Sqlite>,
    workflow_id: &str,
) -> Result<Option<u64>, RepositoryError> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM approval_workflow WHERE id = ?")
            .bind(workflow_id)
            .fetch_optional(&mut **tx)
            .await?;
    version.map(parse_version).transpose()
}

/// Inserts the change request unless it is already stored. A stored copy must
/// match field for field; submitted requests are never rewritten.
async fn insert_change_request(
    tx: &mut Transaction<'_, Sqlite>,
    change_request: &ChangeRequest,
) -> Result<(), RepositoryError> {
    let submitted_at = change_request.submitted_at.to_rfc3339();
    let inserted = sqlx::query(
        "INSERT INTO change_request (id, title, description, priority, category, requester, submitted_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&change_request.id.0)
    .bind(&change_request.title)
    .bind(&change_request.description)
    .bind(change_request.priority.as_str())
    .bind(&change_request.category)
    .bind(&change_request.requester)
    .bind(&submitted_at)
    .execute(&mut **tx)
    .await?;
    if inserted.rows_affected() == 1 {
        return Ok(());
    }

    let row = sqlx::query(
        "SELECT title, description, priority, category, requester, submitted_at
         FROM change_request WHERE id = ?",
    )
    .bind(&change_request.id.0)
    .fetch_one(&mut **tx)
    .await?;

    let stored_submitted_at: String = decode(&row, "submitted_at")?;
    let matches = decode::<String>(&row, "title")? == change_request.title
        && decode::<String>(&row, "description")? == change_request.description
        && decode::<String>(&row, "priority")? == change_request.priority.as_str()
        && decode::<String>(&row, "category")? == change_request.category
        && decode::<String>(&row, "requester")? == change_request.requester
        && parse_timestamp("submitted_at", &stored_submitted_at)? == change_request.submitted_at;
    if matches {
        Ok(())
    } else {
        Err(RepositoryError::ChangeRequestMismatch {
            change_request_id: change_request.id.0.clone(),
        })
    }
}

async fn upsert_steps(
    tx: &mut Transaction<'_, Sqlite>,
    workflow: &Workflow,
) -> Result<(), RepositoryError> {
    for step in &workflow.steps {
        sqlx::query(
            "INSERT INTO approval_step (id, workflow_id, sequence_number, approver_id, approver_name,
                                        status, due_date, decision, decision_comments,
                                        decision_timestamp, conditions, delegated_to)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 approver_id = excluded.approver_id,
                 approver_name = excluded.approver_name,
                 status = excluded.status,
                 due_date = excluded.due_date,
                 decision = excluded.decision,
                 decision_comments = excluded.decision_comments,
                 decision_timestamp = excluded.decision_timestamp,
                 conditions = excluded.conditions,
                 delegated_to = excluded.delegated_to",
        )
        .bind(&step.id.0)
        .bind(&workflow.id.0)
        .bind(i64::from(step.sequence_number))
        .bind(&step.approver_id)
        .bind(&step.approver_name)
        .bind(step.status.as_str())
        .bind(step.due_date.to_rfc3339())
        .bind(step.decision.map(|decision| decision.as_str()))
        .bind(&step.decision_comments)
        .bind(step.decision_timestamp.map(|dt| dt.to_rfc3339()))
        .bind(&step.conditions)
        .bind(&step.delegated_to)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS}
             FROM approval_workflow w
             JOIN change_request c ON c.id = w.change_request_id
             WHERE w.id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(self.hydrate(r).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_step_id(
        &self,
        step_id: &StepId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let workflow_id: Option<String> =
            sqlx::query_scalar("SELECT workflow_id FROM approval_step WHERE id = ?")
                .bind(&step_id.0)
                .fetch_optional(&self.pool)
                .await?;

        match workflow_id {
            Some(workflow_id) => self.find_by_id(&WorkflowId(workflow_id)).await,
            None => Ok(None),
        }
    }

    async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, RepositoryError> {
        let rows: Vec<SqliteRow> = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {WORKFLOW_COLUMNS}
                 FROM approval_workflow w
                 JOIN change_request c ON c.id = w.change_request_id
                 WHERE w.status = ?
                 ORDER BY w.created_at ASC, w.id ASC"
            ))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {WORKFLOW_COLUMNS}
                 FROM approval_workflow w
                 JOIN change_request c ON c.id = w.change_request_id
                 ORDER BY w.created_at ASC, w.id ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        };

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            workflows.push(self.hydrate(row).await?);
        }
        Ok(workflows)
    }

    async fn save(
        &self,
        workflow: &Workflow,
        expected_version: Option<u64>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let conflict = |actual: Option<u64>| RepositoryError::Conflict {
            workflow_id: workflow.id.0.clone(),
            expected: expected_version,
            actual,
        };

        match expected_version {
            None => {
                let actual = stored_version(&mut tx, &workflow.id.0).await?;
                if actual.is_some() {
                    return Err(conflict(actual));
                }
                insert_change_request(&mut tx, &workflow.change_request).await?;
                sqlx::query(
                    "INSERT INTO approval_workflow (id, change_request_id, status, version, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&workflow.id.0)
                .bind(&workflow.change_request.id.0)
                .bind(workflow.status.as_str())
                .bind(encode_version(workflow.version)?)
                .bind(workflow.created_at.to_rfc3339())
                .bind(workflow.updated_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
            }
            Some(expected) => {
                let updated = sqlx::query(
                    "UPDATE approval_workflow
                     SET status = ?, version = ?, updated_at = ?
                     WHERE id = ? AND version = ?",
                )
                .bind(workflow.status.as_str())
                .bind(encode_version(workflow.version)?)
                .bind(workflow.updated_at.to_rfc3339())
                .bind(&workflow.id.0)
                .bind(encode_version(expected)?)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() == 0 {
                    let actual = stored_version(&mut tx, &workflow.id.0).await?;
                    return Err(conflict(actual));
                }
            }
        }

        upsert_steps(&mut tx, workflow).await?;
        tx.commit().await?;
        Ok(())
    }
}
