//! Task persistence: row mapping, filtered listing, sequence allocation.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{Task, TaskClass, TaskState, WorkSpec};

use super::codec::{
    is_unique_violation, parse_datetime, parse_opt_datetime, parse_opt_uuid, parse_string_list,
    parse_uuid, string_list_json,
};

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    project_id: String,
    phase_id: Option<String>,
    milestone_id: Option<String>,
    short_id: String,
    sequence: i64,
    title: String,
    description: String,
    priority: i64,
    task_class: String,
    capability_tags: String,
    expected_touches: String,
    exclusive_paths: String,
    shared_paths: String,
    work_spec: String,
    state: String,
    version: i64,
    fencing_counter: i64,
    claimed_by: Option<String>,
    ready_at: Option<String>,
    introduced_in_plan_version: i64,
    deprecated_in_plan_version: Option<i64>,
    last_material_plan_version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> CoreResult<Self> {
        let work_spec: WorkSpec = serde_json::from_str(&row.work_spec)?;
        Ok(Task {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            phase_id: parse_opt_uuid(row.phase_id.as_deref())?,
            milestone_id: parse_opt_uuid(row.milestone_id.as_deref())?,
            short_id: row.short_id,
            sequence: row.sequence,
            title: row.title,
            description: row.description,
            priority: i32::try_from(row.priority)
                .map_err(|_| CoreError::Storage(format!("priority out of range: {}", row.priority)))?,
            task_class: TaskClass::from_str(&row.task_class)
                .ok_or_else(|| CoreError::Storage(format!("unknown task class {:?}", row.task_class)))?,
            capability_tags: parse_string_list(&row.capability_tags)?,
            expected_touches: parse_string_list(&row.expected_touches)?,
            exclusive_paths: parse_string_list(&row.exclusive_paths)?,
            shared_paths: parse_string_list(&row.shared_paths)?,
            work_spec,
            state: TaskState::from_str(&row.state)
                .ok_or_else(|| CoreError::Storage(format!("unknown task state {:?}", row.state)))?,
            version: row.version,
            fencing_counter: row.fencing_counter,
            claimed_by: row.claimed_by,
            ready_at: parse_opt_datetime(row.ready_at.as_deref())?,
            introduced_in_plan_version: row.introduced_in_plan_version,
            deprecated_in_plan_version: row.deprecated_in_plan_version,
            last_material_plan_version: row.last_material_plan_version,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

/// Filter criteria for listing tasks within a project.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub phase_id: Option<Uuid>,
    pub milestone_id: Option<Uuid>,
    pub task_class: Option<TaskClass>,
    pub capability_tag: Option<String>,
    /// Substring match on title and description.
    pub text: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Next unused task sequence within (project, milestone). Tasks without a
/// milestone draw from a project-scoped sequence.
pub async fn next_task_sequence(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    milestone_id: Option<Uuid>,
) -> CoreResult<i64> {
    let (max,): (i64,) = match milestone_id {
        Some(m) => {
            sqlx::query_as(
                "SELECT COALESCE(MAX(sequence), 0) FROM tasks WHERE project_id = ? AND milestone_id = ?",
            )
            .bind(project_id.to_string())
            .bind(m.to_string())
            .fetch_one(conn)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT COALESCE(MAX(sequence), 0) FROM tasks WHERE project_id = ? AND milestone_id IS NULL",
            )
            .bind(project_id.to_string())
            .fetch_one(conn)
            .await?
        }
    };
    Ok(max + 1)
}

pub async fn insert(conn: &mut SqliteConnection, task: &Task) -> CoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO tasks (id, project_id, phase_id, milestone_id, short_id, sequence,
            title, description, priority, task_class, capability_tags, expected_touches,
            exclusive_paths, shared_paths, work_spec, state, version, fencing_counter,
            claimed_by, ready_at, introduced_in_plan_version, deprecated_in_plan_version,
            last_material_plan_version, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task.id.to_string())
    .bind(task.project_id.to_string())
    .bind(task.phase_id.map(|id| id.to_string()))
    .bind(task.milestone_id.map(|id| id.to_string()))
    .bind(&task.short_id)
    .bind(task.sequence)
    .bind(&task.title)
    .bind(&task.description)
    .bind(i64::from(task.priority))
    .bind(task.task_class.as_str())
    .bind(string_list_json(&task.capability_tags)?)
    .bind(string_list_json(&task.expected_touches)?)
    .bind(string_list_json(&task.exclusive_paths)?)
    .bind(string_list_json(&task.shared_paths)?)
    .bind(serde_json::to_string(&task.work_spec)?)
    .bind(task.state.as_str())
    .bind(task.version)
    .bind(task.fencing_counter)
    .bind(&task.claimed_by)
    .bind(task.ready_at.map(|t| t.to_rfc3339()))
    .bind(task.introduced_in_plan_version)
    .bind(task.deprecated_in_plan_version)
    .bind(task.last_material_plan_version)
    .bind(task.created_at.to_rfc3339())
    .bind(task.updated_at.to_rfc3339())
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(CoreError::ShortIdConflict(task.short_id.clone())),
        Err(e) => Err(e.into()),
    }
}

pub async fn update(conn: &mut SqliteConnection, task: &Task) -> CoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks SET phase_id = ?, milestone_id = ?, title = ?, description = ?,
            priority = ?, task_class = ?, capability_tags = ?, expected_touches = ?,
            exclusive_paths = ?, shared_paths = ?, work_spec = ?, state = ?, version = ?,
            fencing_counter = ?, claimed_by = ?, ready_at = ?, deprecated_in_plan_version = ?,
            last_material_plan_version = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(task.phase_id.map(|id| id.to_string()))
    .bind(task.milestone_id.map(|id| id.to_string()))
    .bind(&task.title)
    .bind(&task.description)
    .bind(i64::from(task.priority))
    .bind(task.task_class.as_str())
    .bind(string_list_json(&task.capability_tags)?)
    .bind(string_list_json(&task.expected_touches)?)
    .bind(string_list_json(&task.exclusive_paths)?)
    .bind(string_list_json(&task.shared_paths)?)
    .bind(serde_json::to_string(&task.work_spec)?)
    .bind(task.state.as_str())
    .bind(task.version)
    .bind(task.fencing_counter)
    .bind(&task.claimed_by)
    .bind(task.ready_at.map(|t| t.to_rfc3339()))
    .bind(task.deprecated_in_plan_version)
    .bind(task.last_material_plan_version)
    .bind(task.updated_at.to_rfc3339())
    .bind(task.id.to_string())
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::TaskNotFound(task.id));
    }
    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id.to_string())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::TaskNotFound(id));
    }
    Ok(())
}

pub async fn fetch(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<Option<Task>> {
    let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.map(Task::try_from).transpose()
}

/// Fetch or fail with TASK_NOT_FOUND.
pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<Task> {
    fetch(conn, id).await?.ok_or(CoreError::TaskNotFound(id))
}

pub async fn fetch_by_short_id(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    short_id: &str,
) -> CoreResult<Option<Task>> {
    let row: Option<TaskRow> =
        sqlx::query_as("SELECT * FROM tasks WHERE project_id = ? AND short_id = ?")
            .bind(project_id.to_string())
            .bind(short_id)
            .fetch_optional(conn)
            .await?;
    row.map(Task::try_from).transpose()
}

pub async fn list(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    filter: &TaskFilter,
) -> CoreResult<Vec<Task>> {
    let mut sql = String::from("SELECT * FROM tasks WHERE project_id = ?");
    let mut bindings: Vec<String> = vec![project_id.to_string()];

    if let Some(state) = filter.state {
        sql.push_str(" AND state = ?");
        bindings.push(state.as_str().to_string());
    }
    if let Some(phase_id) = filter.phase_id {
        sql.push_str(" AND phase_id = ?");
        bindings.push(phase_id.to_string());
    }
    if let Some(milestone_id) = filter.milestone_id {
        sql.push_str(" AND milestone_id = ?");
        bindings.push(milestone_id.to_string());
    }
    if let Some(class) = filter.task_class {
        sql.push_str(" AND task_class = ?");
        bindings.push(class.as_str().to_string());
    }
    if let Some(tag) = &filter.capability_tag {
        // capability_tags is a JSON array of strings
        sql.push_str(" AND capability_tags LIKE ?");
        bindings.push(format!("%\"{tag}\"%"));
    }
    if let Some(text) = &filter.text {
        sql.push_str(" AND (title LIKE ? OR description LIKE ?)");
        let pattern = format!("%{text}%");
        bindings.push(pattern.clone());
        bindings.push(pattern);
    }

    sql.push_str(" ORDER BY priority, short_id");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = filter.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    let mut query = sqlx::query_as::<_, TaskRow>(&sql);
    for binding in &bindings {
        query = query.bind(binding);
    }

    let rows = query.fetch_all(conn).await?;
    rows.into_iter().map(Task::try_from).collect()
}

pub async fn list_by_state(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    state: TaskState,
) -> CoreResult<Vec<Task>> {
    let rows: Vec<TaskRow> = sqlx::query_as(
        "SELECT * FROM tasks WHERE project_id = ? AND state = ? ORDER BY priority, short_id",
    )
    .bind(project_id.to_string())
    .bind(state.as_str())
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(Task::try_from).collect()
}

/// Exclusive paths of all tasks currently occupying their paths
/// (claimed or in progress), for the contention rank component.
pub async fn active_exclusive_paths(
    conn: &mut SqliteConnection,
    project_id: Uuid,
) -> CoreResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT exclusive_paths FROM tasks
         WHERE project_id = ? AND state IN ('claimed', 'in_progress')",
    )
    .bind(project_id.to_string())
    .fetch_all(conn)
    .await?;

    let mut paths = Vec::new();
    for (json,) in rows {
        paths.extend(parse_string_list(&json)?);
    }
    Ok(paths)
}

pub async fn count_artifacts(conn: &mut SqliteConnection, task_id: Uuid) -> CoreResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM artifacts WHERE task_id = ?")
        .bind(task_id.to_string())
        .fetch_one(conn)
        .await?;
    Ok(count)
}
