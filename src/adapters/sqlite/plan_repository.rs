//! Plan change set and plan version persistence.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    ChangeSetStatus, ImpactPreview, PlanChangeSet, PlanOperation, PlanVersion,
};

use super::codec::{parse_datetime, parse_uuid};

#[derive(Debug, sqlx::FromRow)]
struct ChangeSetRow {
    id: String,
    project_id: String,
    base_plan_version: i64,
    target_plan_version: Option<i64>,
    operations: String,
    status: String,
    impact_preview: Option<String>,
    submitted_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ChangeSetRow> for PlanChangeSet {
    type Error = CoreError;

    fn try_from(row: ChangeSetRow) -> CoreResult<Self> {
        let operations: Vec<PlanOperation> = serde_json::from_str(&row.operations)?;
        let impact_preview: Option<ImpactPreview> = row
            .impact_preview
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(PlanChangeSet {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            base_plan_version: row.base_plan_version,
            target_plan_version: row.target_plan_version,
            operations,
            status: ChangeSetStatus::from_str(&row.status).ok_or_else(|| {
                CoreError::Storage(format!("unknown change set status {:?}", row.status))
            })?,
            impact_preview,
            submitted_by: row.submitted_by,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

pub async fn insert_change_set(conn: &mut SqliteConnection, cs: &PlanChangeSet) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO plan_change_sets (id, project_id, base_plan_version, target_plan_version,
            operations, status, impact_preview, submitted_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(cs.id.to_string())
    .bind(cs.project_id.to_string())
    .bind(cs.base_plan_version)
    .bind(cs.target_plan_version)
    .bind(serde_json::to_string(&cs.operations)?)
    .bind(cs.status.as_str())
    .bind(
        cs.impact_preview
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .bind(&cs.submitted_by)
    .bind(cs.created_at.to_rfc3339())
    .bind(cs.updated_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn update_change_set(conn: &mut SqliteConnection, cs: &PlanChangeSet) -> CoreResult<()> {
    let result = sqlx::query(
        "UPDATE plan_change_sets SET target_plan_version = ?, status = ?, impact_preview = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(cs.target_plan_version)
    .bind(cs.status.as_str())
    .bind(
        cs.impact_preview
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .bind(cs.updated_at.to_rfc3339())
    .bind(cs.id.to_string())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::InvalidArgument(format!("change set {} not found", cs.id)));
    }
    Ok(())
}

pub async fn fetch_change_set(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> CoreResult<Option<PlanChangeSet>> {
    let row: Option<ChangeSetRow> = sqlx::query_as("SELECT * FROM plan_change_sets WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.map(PlanChangeSet::try_from).transpose()
}

pub async fn list_change_sets(
    conn: &mut SqliteConnection,
    project_id: Uuid,
) -> CoreResult<Vec<PlanChangeSet>> {
    let rows: Vec<ChangeSetRow> =
        sqlx::query_as("SELECT * FROM plan_change_sets WHERE project_id = ? ORDER BY created_at, id")
            .bind(project_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(PlanChangeSet::try_from).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct PlanVersionRow {
    id: String,
    project_id: String,
    version_number: i64,
    change_set_id: String,
    created_at: String,
}

impl TryFrom<PlanVersionRow> for PlanVersion {
    type Error = CoreError;

    fn try_from(row: PlanVersionRow) -> CoreResult<Self> {
        Ok(PlanVersion {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            version_number: row.version_number,
            change_set_id: parse_uuid(&row.change_set_id)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

pub async fn insert_plan_version(conn: &mut SqliteConnection, pv: &PlanVersion) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO plan_versions (id, project_id, version_number, change_set_id, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(pv.id.to_string())
    .bind(pv.project_id.to_string())
    .bind(pv.version_number)
    .bind(pv.change_set_id.to_string())
    .bind(pv.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list_plan_versions(
    conn: &mut SqliteConnection,
    project_id: Uuid,
) -> CoreResult<Vec<PlanVersion>> {
    let rows: Vec<PlanVersionRow> =
        sqlx::query_as("SELECT * FROM plan_versions WHERE project_id = ? ORDER BY version_number")
            .bind(project_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(PlanVersion::try_from).collect()
}
