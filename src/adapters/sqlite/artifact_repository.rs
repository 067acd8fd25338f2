//! Artifact and integration attempt persistence. Insert-only by design;
//! the storage triggers reject anything else.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{Artifact, CheckStatus, IntegrationAttempt, IntegrationOutcome};

use super::codec::{parse_datetime, parse_string_list, parse_uuid, string_list_json};

#[derive(Debug, sqlx::FromRow)]
struct ArtifactRow {
    id: String,
    task_id: String,
    project_id: String,
    branch: String,
    commit_sha: String,
    check_status: String,
    touched_files: String,
    created_at: String,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = CoreError;

    fn try_from(row: ArtifactRow) -> CoreResult<Self> {
        Ok(Artifact {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            project_id: parse_uuid(&row.project_id)?,
            branch: row.branch,
            commit_sha: row.commit_sha,
            check_status: CheckStatus::from_str(&row.check_status).ok_or_else(|| {
                CoreError::Storage(format!("unknown check status {:?}", row.check_status))
            })?,
            touched_files: parse_string_list(&row.touched_files)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

pub async fn insert_artifact(conn: &mut SqliteConnection, artifact: &Artifact) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO artifacts (id, task_id, project_id, branch, commit_sha, check_status,
            touched_files, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(artifact.id.to_string())
    .bind(artifact.task_id.to_string())
    .bind(artifact.project_id.to_string())
    .bind(&artifact.branch)
    .bind(&artifact.commit_sha)
    .bind(artifact.check_status.as_str())
    .bind(string_list_json(&artifact.touched_files)?)
    .bind(artifact.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list_artifacts(conn: &mut SqliteConnection, task_id: Uuid) -> CoreResult<Vec<Artifact>> {
    let rows: Vec<ArtifactRow> =
        sqlx::query_as("SELECT * FROM artifacts WHERE task_id = ? ORDER BY created_at, id")
            .bind(task_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(Artifact::try_from).collect()
}

/// Whether any recorded artifact for the task has passing checks.
pub async fn has_passed_artifact(conn: &mut SqliteConnection, task_id: Uuid) -> CoreResult<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM artifacts WHERE task_id = ? AND check_status = 'passed' LIMIT 1")
            .bind(task_id.to_string())
            .fetch_optional(conn)
            .await?;
    Ok(row.is_some())
}

#[derive(Debug, sqlx::FromRow)]
struct IntegrationAttemptRow {
    id: String,
    task_id: String,
    project_id: String,
    outcome: String,
    detail: Option<String>,
    created_at: String,
}

impl TryFrom<IntegrationAttemptRow> for IntegrationAttempt {
    type Error = CoreError;

    fn try_from(row: IntegrationAttemptRow) -> CoreResult<Self> {
        Ok(IntegrationAttempt {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            project_id: parse_uuid(&row.project_id)?,
            outcome: IntegrationOutcome::from_str(&row.outcome).ok_or_else(|| {
                CoreError::Storage(format!("unknown integration outcome {:?}", row.outcome))
            })?,
            detail: row.detail,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

pub async fn insert_integration_attempt(
    conn: &mut SqliteConnection,
    attempt: &IntegrationAttempt,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO integration_attempts (id, task_id, project_id, outcome, detail, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(attempt.id.to_string())
    .bind(attempt.task_id.to_string())
    .bind(attempt.project_id.to_string())
    .bind(attempt.outcome.as_str())
    .bind(&attempt.detail)
    .bind(attempt.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list_integration_attempts(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> CoreResult<Vec<IntegrationAttempt>> {
    let rows: Vec<IntegrationAttemptRow> =
        sqlx::query_as("SELECT * FROM integration_attempts WHERE task_id = ? ORDER BY created_at, id")
            .bind(task_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(IntegrationAttempt::try_from).collect()
}
