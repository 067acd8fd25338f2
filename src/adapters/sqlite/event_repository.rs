//! Event log, task changelog, and the idempotency ledger.
//!
//! Events get their monotonic id from the AUTOINCREMENT key at insert, inside
//! the caller's transaction; commit order is publication order.

use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{EventDraft, EventRecord};

use super::codec::{parse_datetime, parse_uuid};

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    project_id: String,
    entity_type: String,
    entity_id: String,
    event_type: String,
    payload: String,
    correlation_id: Option<String>,
    created_at: String,
}

impl TryFrom<EventRow> for EventRecord {
    type Error = CoreError;

    fn try_from(row: EventRow) -> CoreResult<Self> {
        Ok(EventRecord {
            id: row.id,
            project_id: parse_uuid(&row.project_id)?,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            event_type: row.event_type,
            payload: serde_json::from_str(&row.payload)?,
            correlation_id: row.correlation_id,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

pub async fn append(
    conn: &mut SqliteConnection,
    draft: &EventDraft,
    created_at: &str,
) -> CoreResult<EventRecord> {
    let result = sqlx::query(
        "INSERT INTO event_log (project_id, entity_type, entity_id, event_type, payload,
            correlation_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(draft.project_id.to_string())
    .bind(draft.entity_type.as_str())
    .bind(&draft.entity_id)
    .bind(draft.event_type.as_str())
    .bind(serde_json::to_string(&draft.payload)?)
    .bind(&draft.correlation_id)
    .bind(created_at)
    .fetch_one(conn)
    .await?;

    let id: i64 = result.try_get("id")?;
    Ok(EventRecord {
        id,
        project_id: draft.project_id,
        entity_type: draft.entity_type.as_str().to_string(),
        entity_id: draft.entity_id.clone(),
        event_type: draft.event_type.as_str().to_string(),
        payload: draft.payload.clone(),
        correlation_id: draft.correlation_id.clone(),
        created_at: parse_datetime(created_at)?,
    })
}

/// Events for a project with id greater than `since`, in commit order.
pub async fn list_since(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    since: i64,
    limit: u32,
) -> CoreResult<Vec<EventRecord>> {
    let rows: Vec<EventRow> = sqlx::query_as(
        "SELECT * FROM event_log WHERE project_id = ? AND id > ? ORDER BY id LIMIT ?",
    )
    .bind(project_id.to_string())
    .bind(since)
    .bind(i64::from(limit))
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(EventRecord::try_from).collect()
}

/// Filtered projection by entity kind (e.g. the task event stream).
pub async fn list_for_entity_kind(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    entity_type: &str,
    since: i64,
    limit: u32,
) -> CoreResult<Vec<EventRecord>> {
    let rows: Vec<EventRow> = sqlx::query_as(
        "SELECT * FROM event_log WHERE project_id = ? AND entity_type = ? AND id > ?
         ORDER BY id LIMIT ?",
    )
    .bind(project_id.to_string())
    .bind(entity_type)
    .bind(since)
    .bind(i64::from(limit))
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(EventRecord::try_from).collect()
}

pub async fn list_for_entity(
    conn: &mut SqliteConnection,
    entity_type: &str,
    entity_id: &str,
) -> CoreResult<Vec<EventRecord>> {
    let rows: Vec<EventRow> =
        sqlx::query_as("SELECT * FROM event_log WHERE entity_type = ? AND entity_id = ? ORDER BY id")
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(EventRecord::try_from).collect()
}

pub async fn count_for_project(conn: &mut SqliteConnection, project_id: Uuid) -> CoreResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event_log WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_one(conn)
        .await?;
    Ok(count)
}

pub async fn insert_changelog(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    project_id: Uuid,
    from_state: &str,
    to_state: &str,
    actor_id: Option<&str>,
    reason: Option<&str>,
    created_at: &str,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO task_changelog (task_id, project_id, from_state, to_state, actor_id, reason, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id.to_string())
    .bind(project_id.to_string())
    .bind(from_state)
    .bind(to_state)
    .bind(actor_id)
    .bind(reason)
    .bind(created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Stored outcome of a previously committed operation with this correlation
/// id, if any.
pub async fn replayed_outcome(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    correlation_id: &str,
) -> CoreResult<Option<serde_json::Value>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT outcome FROM operation_results WHERE project_id = ? AND correlation_id = ?",
    )
    .bind(project_id.to_string())
    .bind(correlation_id)
    .fetch_optional(conn)
    .await?;
    row.map(|(json,)| serde_json::from_str(&json).map_err(CoreError::from))
        .transpose()
}

pub async fn record_outcome(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    correlation_id: &str,
    operation: &str,
    outcome: &serde_json::Value,
    created_at: &str,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO operation_results (project_id, correlation_id, operation, outcome, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(project_id.to_string())
    .bind(correlation_id)
    .bind(operation)
    .bind(serde_json::to_string(outcome)?)
    .bind(created_at)
    .execute(conn)
    .await?;
    Ok(())
}
