//! Lease, reservation, and execution snapshot persistence.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    ExecutionSnapshot, Lease, LeaseStatus, Reservation, ReservationStatus, WorkSpec,
};

use super::codec::{is_unique_violation, parse_datetime, parse_uuid};

#[derive(Debug, sqlx::FromRow)]
struct LeaseRow {
    id: String,
    token: String,
    task_id: String,
    project_id: String,
    agent_id: String,
    status: String,
    fencing_counter: i64,
    ttl_seconds: i64,
    expires_at: String,
    heartbeat_at: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<LeaseRow> for Lease {
    type Error = CoreError;

    fn try_from(row: LeaseRow) -> CoreResult<Self> {
        Ok(Lease {
            id: parse_uuid(&row.id)?,
            token: row.token,
            task_id: parse_uuid(&row.task_id)?,
            project_id: parse_uuid(&row.project_id)?,
            agent_id: row.agent_id,
            status: LeaseStatus::from_str(&row.status)
                .ok_or_else(|| CoreError::Storage(format!("unknown lease status {:?}", row.status)))?,
            fencing_counter: row.fencing_counter,
            ttl_seconds: row.ttl_seconds,
            expires_at: parse_datetime(&row.expires_at)?,
            heartbeat_at: parse_datetime(&row.heartbeat_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

/// Insert an active lease. The partial unique index on `(task_id) WHERE
/// status = 'active'` turns a concurrent claim on the same task into
/// LEASE_CONFLICT for the loser.
pub async fn insert_lease(conn: &mut SqliteConnection, lease: &Lease) -> CoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO leases (id, token, task_id, project_id, agent_id, status, fencing_counter,
            ttl_seconds, expires_at, heartbeat_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(lease.id.to_string())
    .bind(&lease.token)
    .bind(lease.task_id.to_string())
    .bind(lease.project_id.to_string())
    .bind(&lease.agent_id)
    .bind(lease.status.as_str())
    .bind(lease.fencing_counter)
    .bind(lease.ttl_seconds)
    .bind(lease.expires_at.to_rfc3339())
    .bind(lease.heartbeat_at.to_rfc3339())
    .bind(lease.created_at.to_rfc3339())
    .bind(lease.updated_at.to_rfc3339())
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(CoreError::LeaseConflict(lease.task_id)),
        Err(e) => Err(e.into()),
    }
}

pub async fn update_lease(conn: &mut SqliteConnection, lease: &Lease) -> CoreResult<()> {
    let result = sqlx::query(
        "UPDATE leases SET status = ?, expires_at = ?, heartbeat_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(lease.status.as_str())
    .bind(lease.expires_at.to_rfc3339())
    .bind(lease.heartbeat_at.to_rfc3339())
    .bind(lease.updated_at.to_rfc3339())
    .bind(lease.id.to_string())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::Storage(format!("lease {} vanished", lease.id)));
    }
    Ok(())
}

pub async fn fetch_by_token(conn: &mut SqliteConnection, token: &str) -> CoreResult<Option<Lease>> {
    let row: Option<LeaseRow> = sqlx::query_as("SELECT * FROM leases WHERE token = ?")
        .bind(token)
        .fetch_optional(conn)
        .await?;
    row.map(Lease::try_from).transpose()
}

pub async fn fetch_active_for_task(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> CoreResult<Option<Lease>> {
    let row: Option<LeaseRow> =
        sqlx::query_as("SELECT * FROM leases WHERE task_id = ? AND status = 'active'")
            .bind(task_id.to_string())
            .fetch_optional(conn)
            .await?;
    row.map(Lease::try_from).transpose()
}

/// Active leases past their expiry, oldest first, capped at `batch`.
pub async fn expired_leases(
    conn: &mut SqliteConnection,
    now: &str,
    batch: u32,
) -> CoreResult<Vec<Lease>> {
    let rows: Vec<LeaseRow> = sqlx::query_as(
        "SELECT * FROM leases WHERE status = 'active' AND expires_at <= ?
         ORDER BY expires_at LIMIT ?",
    )
    .bind(now)
    .bind(i64::from(batch))
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(Lease::try_from).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: String,
    task_id: String,
    project_id: String,
    assignee_agent_id: String,
    status: String,
    ttl_seconds: i64,
    expires_at: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = CoreError;

    fn try_from(row: ReservationRow) -> CoreResult<Self> {
        Ok(Reservation {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            project_id: parse_uuid(&row.project_id)?,
            assignee_agent_id: row.assignee_agent_id,
            status: ReservationStatus::from_str(&row.status).ok_or_else(|| {
                CoreError::Storage(format!("unknown reservation status {:?}", row.status))
            })?,
            ttl_seconds: row.ttl_seconds,
            expires_at: parse_datetime(&row.expires_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

pub async fn insert_reservation(conn: &mut SqliteConnection, r: &Reservation) -> CoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO reservations (id, task_id, project_id, assignee_agent_id, status,
            ttl_seconds, expires_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(r.id.to_string())
    .bind(r.task_id.to_string())
    .bind(r.project_id.to_string())
    .bind(&r.assignee_agent_id)
    .bind(r.status.as_str())
    .bind(r.ttl_seconds)
    .bind(r.expires_at.to_rfc3339())
    .bind(r.created_at.to_rfc3339())
    .bind(r.updated_at.to_rfc3339())
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(CoreError::ReservationConflict(r.task_id)),
        Err(e) => Err(e.into()),
    }
}

pub async fn set_reservation_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: ReservationStatus,
    updated_at: &str,
) -> CoreResult<()> {
    sqlx::query("UPDATE reservations SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(updated_at)
        .bind(id.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_active_reservation(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> CoreResult<Option<Reservation>> {
    let row: Option<ReservationRow> =
        sqlx::query_as("SELECT * FROM reservations WHERE task_id = ? AND status = 'active'")
            .bind(task_id.to_string())
            .fetch_optional(conn)
            .await?;
    row.map(Reservation::try_from).transpose()
}

pub async fn expired_reservations(
    conn: &mut SqliteConnection,
    now: &str,
    batch: u32,
) -> CoreResult<Vec<Reservation>> {
    let rows: Vec<ReservationRow> = sqlx::query_as(
        "SELECT * FROM reservations WHERE status = 'active' AND expires_at <= ?
         ORDER BY expires_at LIMIT ?",
    )
    .bind(now)
    .bind(i64::from(batch))
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(Reservation::try_from).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: String,
    task_id: String,
    project_id: String,
    lease_token: String,
    plan_version: i64,
    work_spec: String,
    captured_at: String,
}

impl TryFrom<SnapshotRow> for ExecutionSnapshot {
    type Error = CoreError;

    fn try_from(row: SnapshotRow) -> CoreResult<Self> {
        let work_spec: WorkSpec = serde_json::from_str(&row.work_spec)?;
        Ok(ExecutionSnapshot {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            project_id: parse_uuid(&row.project_id)?,
            lease_token: row.lease_token,
            plan_version: row.plan_version,
            work_spec,
            captured_at: parse_datetime(&row.captured_at)?,
        })
    }
}

pub async fn insert_snapshot(conn: &mut SqliteConnection, s: &ExecutionSnapshot) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO execution_snapshots (id, task_id, project_id, lease_token, plan_version,
            work_spec, captured_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(s.id.to_string())
    .bind(s.task_id.to_string())
    .bind(s.project_id.to_string())
    .bind(&s.lease_token)
    .bind(s.plan_version)
    .bind(serde_json::to_string(&s.work_spec)?)
    .bind(s.captured_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn latest_snapshot_for_task(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> CoreResult<Option<ExecutionSnapshot>> {
    let row: Option<SnapshotRow> = sqlx::query_as(
        "SELECT * FROM execution_snapshots WHERE task_id = ? ORDER BY captured_at DESC, id DESC LIMIT 1",
    )
    .bind(task_id.to_string())
    .fetch_optional(conn)
    .await?;
    row.map(ExecutionSnapshot::try_from).transpose()
}

pub async fn snapshot_for_lease(
    conn: &mut SqliteConnection,
    lease_token: &str,
) -> CoreResult<Option<ExecutionSnapshot>> {
    let row: Option<SnapshotRow> =
        sqlx::query_as("SELECT * FROM execution_snapshots WHERE lease_token = ?")
            .bind(lease_token)
            .fetch_optional(conn)
            .await?;
    row.map(ExecutionSnapshot::try_from).transpose()
}
