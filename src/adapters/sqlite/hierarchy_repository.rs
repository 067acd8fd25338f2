//! Phase and milestone persistence, including sequence allocation.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{Milestone, Phase};

use super::codec::{is_unique_violation, parse_datetime, parse_uuid};

#[derive(Debug, sqlx::FromRow)]
struct PhaseRow {
    id: String,
    project_id: String,
    name: String,
    sequence: i64,
    short_id: String,
    created_at: String,
}

impl TryFrom<PhaseRow> for Phase {
    type Error = CoreError;

    fn try_from(row: PhaseRow) -> CoreResult<Self> {
        Ok(Phase {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            name: row.name,
            sequence: row.sequence,
            short_id: row.short_id,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MilestoneRow {
    id: String,
    project_id: String,
    phase_id: String,
    name: String,
    sequence: i64,
    short_id: String,
    created_at: String,
}

impl TryFrom<MilestoneRow> for Milestone {
    type Error = CoreError;

    fn try_from(row: MilestoneRow) -> CoreResult<Self> {
        Ok(Milestone {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            phase_id: parse_uuid(&row.phase_id)?,
            name: row.name,
            sequence: row.sequence,
            short_id: row.short_id,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

/// Next unused phase sequence within the project, ordered by (sequence, id).
pub async fn next_phase_sequence(conn: &mut SqliteConnection, project_id: Uuid) -> CoreResult<i64> {
    let (max,): (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM phases WHERE project_id = ?")
            .bind(project_id.to_string())
            .fetch_one(conn)
            .await?;
    Ok(max + 1)
}

pub async fn next_milestone_sequence(conn: &mut SqliteConnection, phase_id: Uuid) -> CoreResult<i64> {
    let (max,): (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM milestones WHERE phase_id = ?")
            .bind(phase_id.to_string())
            .fetch_one(conn)
            .await?;
    Ok(max + 1)
}

pub async fn insert_phase(conn: &mut SqliteConnection, phase: &Phase) -> CoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO phases (id, project_id, name, sequence, short_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(phase.id.to_string())
    .bind(phase.project_id.to_string())
    .bind(&phase.name)
    .bind(phase.sequence)
    .bind(&phase.short_id)
    .bind(phase.created_at.to_rfc3339())
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(CoreError::ShortIdConflict(phase.short_id.clone())),
        Err(e) => Err(e.into()),
    }
}

pub async fn insert_milestone(conn: &mut SqliteConnection, milestone: &Milestone) -> CoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO milestones (id, project_id, phase_id, name, sequence, short_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(milestone.id.to_string())
    .bind(milestone.project_id.to_string())
    .bind(milestone.phase_id.to_string())
    .bind(&milestone.name)
    .bind(milestone.sequence)
    .bind(&milestone.short_id)
    .bind(milestone.created_at.to_rfc3339())
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            Err(CoreError::ShortIdConflict(milestone.short_id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_phase(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<Option<Phase>> {
    let row: Option<PhaseRow> = sqlx::query_as("SELECT * FROM phases WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.map(Phase::try_from).transpose()
}

pub async fn fetch_milestone(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<Option<Milestone>> {
    let row: Option<MilestoneRow> = sqlx::query_as("SELECT * FROM milestones WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.map(Milestone::try_from).transpose()
}

pub async fn list_phases(conn: &mut SqliteConnection, project_id: Uuid) -> CoreResult<Vec<Phase>> {
    let rows: Vec<PhaseRow> =
        sqlx::query_as("SELECT * FROM phases WHERE project_id = ? ORDER BY sequence, id")
            .bind(project_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(Phase::try_from).collect()
}

pub async fn list_milestones(conn: &mut SqliteConnection, phase_id: Uuid) -> CoreResult<Vec<Milestone>> {
    let rows: Vec<MilestoneRow> =
        sqlx::query_as("SELECT * FROM milestones WHERE phase_id = ? ORDER BY sequence, id")
            .bind(phase_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(Milestone::try_from).collect()
}
