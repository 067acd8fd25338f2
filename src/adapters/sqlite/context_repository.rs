//! Memoized bounded-subgraph cache.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::CoreResult;

pub struct CachedContext {
    pub subgraph: serde_json::Value,
    pub computed_at: String,
}

pub async fn fetch(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    ancestor_depth: u32,
    dependent_depth: u32,
) -> CoreResult<Option<CachedContext>> {
    let row: Option<(String, String)> = sqlx::query_as(
        "SELECT subgraph, computed_at FROM context_cache
         WHERE task_id = ? AND ancestor_depth = ? AND dependent_depth = ?",
    )
    .bind(task_id.to_string())
    .bind(i64::from(ancestor_depth))
    .bind(i64::from(dependent_depth))
    .fetch_optional(conn)
    .await?;

    row.map(|(subgraph, computed_at)| {
        Ok(CachedContext {
            subgraph: serde_json::from_str(&subgraph)?,
            computed_at,
        })
    })
    .transpose()
}

pub async fn store(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    project_id: Uuid,
    ancestor_depth: u32,
    dependent_depth: u32,
    subgraph: &serde_json::Value,
    computed_at: &str,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO context_cache
            (task_id, project_id, ancestor_depth, dependent_depth, subgraph, computed_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id.to_string())
    .bind(project_id.to_string())
    .bind(i64::from(ancestor_depth))
    .bind(i64::from(dependent_depth))
    .bind(serde_json::to_string(subgraph)?)
    .bind(computed_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Drop entries computed before `cutoff`. Returns rows evicted.
pub async fn evict_older_than(conn: &mut SqliteConnection, cutoff: &str) -> CoreResult<u64> {
    let result = sqlx::query("DELETE FROM context_cache WHERE computed_at < ?")
        .bind(cutoff)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Drop all cached subgraphs for a project. Called after replan apply, since
/// any edge mutation can change bounded subgraphs project-wide.
pub async fn evict_project(conn: &mut SqliteConnection, project_id: Uuid) -> CoreResult<u64> {
    let result = sqlx::query("DELETE FROM context_cache WHERE project_id = ?")
        .bind(project_id.to_string())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
