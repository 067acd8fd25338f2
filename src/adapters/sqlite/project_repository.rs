//! Project persistence.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{Project, ProjectStatus};

use super::codec::{parse_datetime, parse_uuid};

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    status: String,
    plan_version: i64,
    replan_barrier: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = CoreError;

    fn try_from(row: ProjectRow) -> CoreResult<Self> {
        Ok(Project {
            id: parse_uuid(&row.id)?,
            name: row.name,
            status: ProjectStatus::from_str(&row.status)
                .ok_or_else(|| CoreError::Storage(format!("unknown project status {:?}", row.status)))?,
            plan_version: row.plan_version,
            replan_barrier: row.replan_barrier != 0,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

pub async fn insert(conn: &mut SqliteConnection, project: &Project) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO projects (id, name, status, plan_version, replan_barrier, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(project.id.to_string())
    .bind(&project.name)
    .bind(project.status.as_str())
    .bind(project.plan_version)
    .bind(i64::from(project.replan_barrier))
    .bind(project.created_at.to_rfc3339())
    .bind(project.updated_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<Option<Project>> {
    let row: Option<ProjectRow> = sqlx::query_as("SELECT * FROM projects WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.map(Project::try_from).transpose()
}

/// Fetch or fail with PROJECT_NOT_FOUND.
pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<Project> {
    fetch(conn, id).await?.ok_or(CoreError::ProjectNotFound(id))
}

pub async fn list(conn: &mut SqliteConnection) -> CoreResult<Vec<Project>> {
    let rows: Vec<ProjectRow> = sqlx::query_as("SELECT * FROM projects ORDER BY created_at, id")
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(Project::try_from).collect()
}

pub async fn update_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: ProjectStatus,
    updated_at: &str,
) -> CoreResult<()> {
    let result = sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(updated_at)
        .bind(id.to_string())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::ProjectNotFound(id));
    }
    Ok(())
}

/// Bump the plan version iff it still equals `expected`. The conditional
/// update doubles as the project-level plan lock under SQLite's writer
/// serialization.
pub async fn bump_plan_version(
    conn: &mut SqliteConnection,
    id: Uuid,
    expected: i64,
    updated_at: &str,
) -> CoreResult<i64> {
    let result = sqlx::query(
        "UPDATE projects SET plan_version = plan_version + 1, updated_at = ?
         WHERE id = ? AND plan_version = ?",
    )
    .bind(updated_at)
    .bind(id.to_string())
    .bind(expected)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        let current = get(conn, id).await?.plan_version;
        return Err(CoreError::PlanVersionConflict { base: expected, current });
    }
    Ok(expected + 1)
}

pub async fn set_replan_barrier(
    conn: &mut SqliteConnection,
    id: Uuid,
    active: bool,
    updated_at: &str,
) -> CoreResult<()> {
    let result = sqlx::query("UPDATE projects SET replan_barrier = ?, updated_at = ? WHERE id = ?")
        .bind(i64::from(active))
        .bind(updated_at)
        .bind(id.to_string())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::ProjectNotFound(id));
    }
    Ok(())
}
