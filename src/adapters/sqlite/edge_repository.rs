//! Dependency edge persistence.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{DependencyEdge, UnlockOn};

use super::codec::{parse_datetime, parse_uuid};

#[derive(Debug, sqlx::FromRow)]
struct EdgeRow {
    id: String,
    project_id: String,
    from_task_id: String,
    to_task_id: String,
    unlock_on: String,
    created_at: String,
}

impl TryFrom<EdgeRow> for DependencyEdge {
    type Error = CoreError;

    fn try_from(row: EdgeRow) -> CoreResult<Self> {
        Ok(DependencyEdge {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            from_task_id: parse_uuid(&row.from_task_id)?,
            to_task_id: parse_uuid(&row.to_task_id)?,
            unlock_on: UnlockOn::from_str(&row.unlock_on)
                .ok_or_else(|| CoreError::Storage(format!("unknown unlock_on {:?}", row.unlock_on)))?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

pub async fn insert(conn: &mut SqliteConnection, edge: &DependencyEdge) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO dependency_edges (id, project_id, from_task_id, to_task_id, unlock_on, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(edge.id.to_string())
    .bind(edge.project_id.to_string())
    .bind(edge.from_task_id.to_string())
    .bind(edge.to_task_id.to_string())
    .bind(edge.unlock_on.as_str())
    .bind(edge.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn remove(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    from: Uuid,
    to: Uuid,
) -> CoreResult<bool> {
    let result = sqlx::query(
        "DELETE FROM dependency_edges WHERE project_id = ? AND from_task_id = ? AND to_task_id = ?",
    )
    .bind(project_id.to_string())
    .bind(from.to_string())
    .bind(to.to_string())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn exists(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    from: Uuid,
    to: Uuid,
) -> CoreResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM dependency_edges WHERE project_id = ? AND from_task_id = ? AND to_task_id = ?",
    )
    .bind(project_id.to_string())
    .bind(from.to_string())
    .bind(to.to_string())
    .fetch_optional(conn)
    .await?;
    Ok(row.is_some())
}

pub async fn list_for_project(
    conn: &mut SqliteConnection,
    project_id: Uuid,
) -> CoreResult<Vec<DependencyEdge>> {
    let rows: Vec<EdgeRow> =
        sqlx::query_as("SELECT * FROM dependency_edges WHERE project_id = ? ORDER BY created_at, id")
            .bind(project_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(DependencyEdge::try_from).collect()
}

/// Edges pointing at `task_id` (its prerequisites).
pub async fn incoming(conn: &mut SqliteConnection, task_id: Uuid) -> CoreResult<Vec<DependencyEdge>> {
    let rows: Vec<EdgeRow> = sqlx::query_as("SELECT * FROM dependency_edges WHERE to_task_id = ?")
        .bind(task_id.to_string())
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(DependencyEdge::try_from).collect()
}

/// Edges leaving `task_id` (tasks it unlocks).
pub async fn outgoing(conn: &mut SqliteConnection, task_id: Uuid) -> CoreResult<Vec<DependencyEdge>> {
    let rows: Vec<EdgeRow> = sqlx::query_as("SELECT * FROM dependency_edges WHERE from_task_id = ?")
        .bind(task_id.to_string())
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(DependencyEdge::try_from).collect()
}
