//! Scheduler (C4): readiness materialization, the ranked pull queue, the
//! claim protocol with lease fencing, directed reservations, heartbeats, and
//! the expiry sweeps.
//!
//! Races between claimers resolve at the storage layer: the partial unique
//! index on active leases turns the loser's insert into LEASE_CONFLICT and it
//! moves on to the next candidate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::sqlite::{
    edge_repository, event_repository, lease_repository, project_repository, task_repository,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    clamp_ttl, Capability, CoreConfig, EventDraft, EventEntity, EventRecord, EventType,
    ExecutionSnapshot, Lease, LeaseStatus, Principal, Reservation, ReservationStatus, Task,
    TaskState,
};
use crate::domain::ports::Clock;

use super::event_log::EventLog;
use super::lifecycle::{
    apply_transition, require_active_lease, require_active_project, TransitionCtx,
};

/// Whether every incoming edge of `task_id` satisfies its unlock criterion.
pub(crate) async fn edges_satisfied(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> CoreResult<bool> {
    let incoming = edge_repository::incoming(conn, task_id).await?;
    for edge in incoming {
        let source = task_repository::get(conn, edge.from_task_id).await?;
        if !edge.unlock_on.satisfied_by(source.state) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Materialize readiness for the given tasks: Backlog tasks whose edges are
/// all satisfied become Ready; Ready tasks whose edges regressed fall back to
/// Backlog. Other states are left alone.
pub(crate) async fn refresh_readiness(
    conn: &mut SqliteConnection,
    task_ids: &[Uuid],
    now: DateTime<Utc>,
    outbox: &mut Vec<EventRecord>,
) -> CoreResult<()> {
    for &task_id in task_ids {
        let Some(mut task) = task_repository::fetch(conn, task_id).await? else {
            continue;
        };
        let satisfied = edges_satisfied(conn, task_id).await?;
        let target = match (task.state, satisfied) {
            (TaskState::Backlog, true) => TaskState::Ready,
            (TaskState::Ready, false) => TaskState::Backlog,
            _ => continue,
        };
        let ctx = TransitionCtx {
            reason: Some("readiness"),
            ..TransitionCtx::default()
        };
        apply_transition(conn, &mut task, target, now, ctx, outbox).await?;
    }
    Ok(())
}

/// Refresh readiness of every task directly downstream of `task`.
pub(crate) async fn refresh_dependents(
    conn: &mut SqliteConnection,
    task: &Task,
    now: DateTime<Utc>,
    outbox: &mut Vec<EventRecord>,
) -> CoreResult<()> {
    let outgoing = edge_repository::outgoing(conn, task.id).await?;
    let dependents: Vec<Uuid> = outgoing.iter().map(|e| e.to_task_id).collect();
    refresh_readiness(conn, &dependents, now, outbox).await
}

/// Deterministic ranking key: (priority, aging, contention, short_id), all
/// ascending. Aging is the negated quarter-hour bucket of time-since-Ready,
/// so older tasks sort earlier without drowning out priority.
fn rank_key(task: &Task, now: DateTime<Utc>, active_paths: &[String]) -> (i32, i64, i64, String) {
    let age_minutes = task
        .ready_at
        .map(|t| (now - t).num_minutes().max(0))
        .unwrap_or(0);
    let aging = -(age_minutes / 15);
    let contention = task
        .exclusive_paths
        .iter()
        .filter(|p| active_paths.iter().any(|q| q == *p))
        .count() as i64;
    (task.priority, aging, contention, task.short_id.clone())
}

/// Claim request from an agent.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    /// Refused with PLAN_STALE when behind the project's current version.
    pub seen_plan_version: Option<i64>,
    pub ttl_seconds: Option<i64>,
    pub correlation_id: Option<String>,
}

/// Granted claim: the task, the fenced lease, and the execution snapshot the
/// worker must follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimGrant {
    pub task: Task,
    pub lease: Lease,
    pub snapshot: ExecutionSnapshot,
}

pub struct Scheduler {
    pool: SqlitePool,
    events: EventLog,
    clock: Arc<dyn Clock>,
    config: Arc<CoreConfig>,
}

impl Scheduler {
    pub fn new(
        pool: SqlitePool,
        events: EventLog,
        clock: Arc<dyn Clock>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self { pool, events, clock, config }
    }

    /// The ranked pull queue visible to one agent: active project, Ready,
    /// non-checkpoint, not reserved away, capabilities covered.
    pub async fn list_ready_tasks(
        &self,
        principal: &Principal,
        project_id: Uuid,
        capabilities: &[String],
    ) -> CoreResult<Vec<Task>> {
        principal.require(Capability::SchedulePull, Some(project_id))?;
        let now = self.clock.now();
        let mut conn = self.pool.acquire().await?;
        let project = project_repository::get(&mut conn, project_id).await?;
        if !project.accepts_mutations() {
            return Ok(Vec::new());
        }
        self.eligible_candidates(&mut conn, project_id, None, capabilities, now)
            .await
    }

    async fn eligible_candidates(
        &self,
        conn: &mut SqliteConnection,
        project_id: Uuid,
        agent_id: Option<&str>,
        capabilities: &[String],
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Task>> {
        let mut candidates = Vec::new();

        for task in task_repository::list_by_state(conn, project_id, TaskState::Ready).await? {
            if task.task_class.is_checkpoint() || !task.capabilities_match(capabilities) {
                continue;
            }
            // Ready tasks normally carry no reservation; guard anyway.
            match lease_repository::fetch_active_reservation(conn, task.id).await? {
                Some(r) if Some(r.assignee_agent_id.as_str()) != agent_id => continue,
                _ => candidates.push(task),
            }
        }

        // Reserved tasks surface only to their assignee.
        if let Some(agent) = agent_id {
            for task in task_repository::list_by_state(conn, project_id, TaskState::Reserved).await? {
                if !task.capabilities_match(capabilities) {
                    continue;
                }
                if let Some(r) = lease_repository::fetch_active_reservation(conn, task.id).await? {
                    if r.assignee_agent_id == agent && !r.is_expired(now) {
                        candidates.push(task);
                    }
                }
            }
        }

        let active_paths = task_repository::active_exclusive_paths(conn, project_id).await?;
        candidates.sort_by_key(|t| rank_key(t, now, &active_paths));
        Ok(candidates)
    }

    /// Pull-mode claim. Walks the ranked candidates and atomically grants a
    /// fenced lease on the first one it wins; returns `None` when nothing is
    /// eligible.
    pub async fn claim(
        &self,
        principal: &Principal,
        project_id: Uuid,
        request: ClaimRequest,
    ) -> CoreResult<Option<ClaimGrant>> {
        principal.require(Capability::SchedulePull, Some(project_id))?;
        let now = self.clock.now();

        {
            let mut conn = self.pool.acquire().await?;
            if let Some(corr) = request.correlation_id.as_deref() {
                if let Some(v) = event_repository::replayed_outcome(&mut conn, project_id, corr).await? {
                    return Ok(serde_json::from_value(v)?);
                }
            }
            let project = project_repository::get(&mut conn, project_id).await?;
            require_active_project(&project)?;
            if project.replan_barrier {
                return Err(CoreError::ClaimsPaused(project_id));
            }
            if let Some(seen) = request.seen_plan_version {
                if seen < project.plan_version {
                    return Err(CoreError::PlanStale { seen, current: project.plan_version });
                }
            }
        }

        let candidates = {
            let mut conn = self.pool.acquire().await?;
            self.eligible_candidates(
                &mut conn,
                project_id,
                Some(request.agent_id.as_str()),
                &request.capabilities,
                now,
            )
            .await?
        };

        for candidate in candidates {
            match self.try_claim(&candidate, &request, project_id, now).await {
                Ok(grant) => return Ok(Some(grant)),
                Err(CoreError::LeaseConflict(id)) | Err(CoreError::ReservationConflict(id)) => {
                    debug!(task_id = %id, "lost claim race, trying next candidate");
                    continue;
                }
                Err(CoreError::PreconditionFailed(reason)) => {
                    debug!(reason, "candidate no longer claimable, trying next");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn try_claim(
        &self,
        candidate: &Task,
        request: &ClaimRequest,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> CoreResult<ClaimGrant> {
        let mut tx = self.pool.begin().await?;

        // Re-read under the transaction; the ranking snapshot may be stale.
        let mut task = task_repository::get(&mut tx, candidate.id).await?;
        if !matches!(task.state, TaskState::Ready | TaskState::Reserved) {
            return Err(CoreError::PreconditionFailed(format!(
                "task {} left the queue",
                task.id
            )));
        }

        let reservation = lease_repository::fetch_active_reservation(&mut tx, task.id).await?;
        if let Some(r) = &reservation {
            if r.assignee_agent_id != request.agent_id && !r.is_expired(now) {
                return Err(CoreError::ReservationConflict(task.id));
            }
        }

        let project = project_repository::get(&mut tx, project_id).await?;
        let ttl = clamp_ttl(request.ttl_seconds.unwrap_or(self.config.default_lease_ttl_seconds));
        task.fencing_counter += 1;
        let lease = Lease::grant(
            task.id,
            project_id,
            request.agent_id.clone(),
            task.fencing_counter,
            ttl,
            now,
        );
        lease_repository::insert_lease(&mut tx, &lease).await?;
        task.claimed_by = Some(request.agent_id.clone());

        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(request.agent_id.as_str()),
            correlation_id: request.correlation_id.as_deref(),
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::Claimed, now, ctx, &mut outbox).await?;

        if let Some(r) = reservation.filter(|r| !r.is_expired(now)) {
            lease_repository::set_reservation_status(
                &mut tx,
                r.id,
                ReservationStatus::Consumed,
                &now.to_rfc3339(),
            )
            .await?;
            outbox.push(
                event_repository::append(
                    &mut tx,
                    &EventDraft::new(
                        project_id,
                        EventEntity::Reservation,
                        r.id,
                        EventType::ReservationConsumed,
                        json!({ "task_id": task.id, "agent_id": request.agent_id }),
                    ),
                    &now.to_rfc3339(),
                )
                .await?,
            );
        }

        let snapshot = ExecutionSnapshot::capture(&task, &lease.token, project.plan_version, now);
        lease_repository::insert_snapshot(&mut tx, &snapshot).await?;
        outbox.push(
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    project_id,
                    EventEntity::Lease,
                    lease.id,
                    EventType::LeaseGranted,
                    json!({
                        "task_id": task.id,
                        "agent_id": request.agent_id,
                        "fencing_counter": lease.fencing_counter,
                        "expires_at": lease.expires_at,
                    }),
                ),
                &now.to_rfc3339(),
            )
            .await?,
        );
        outbox.push(
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    project_id,
                    EventEntity::Task,
                    snapshot.task_id,
                    EventType::SnapshotCaptured,
                    json!({ "snapshot_id": snapshot.id, "plan_version": snapshot.plan_version }),
                ),
                &now.to_rfc3339(),
            )
            .await?,
        );

        let grant = ClaimGrant { task, lease, snapshot };
        if let Some(corr) = request.correlation_id.as_deref() {
            event_repository::record_outcome(
                &mut tx,
                project_id,
                corr,
                "claim",
                &serde_json::to_value(Some(&grant))?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(grant)
    }

    /// Directed assignment: Ready -> Reserved for one agent, TTL-bounded.
    pub async fn assign(
        &self,
        principal: &Principal,
        task_id: Uuid,
        agent_id: &str,
        ttl_seconds: Option<i64>,
        correlation_id: Option<&str>,
    ) -> CoreResult<Reservation> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        principal.require(Capability::ScheduleAssign, Some(task.project_id))?;

        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, task.project_id, corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }

        let project = project_repository::get(&mut tx, task.project_id).await?;
        require_active_project(&project)?;

        let ttl = clamp_ttl(ttl_seconds.unwrap_or(self.config.default_reservation_ttl_seconds));
        let reservation = Reservation::assign(task.id, task.project_id, agent_id, ttl, now);
        lease_repository::insert_reservation(&mut tx, &reservation).await?;

        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(principal.actor_id.as_str()),
            correlation_id,
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::Reserved, now, ctx, &mut outbox).await?;
        outbox.push(
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    task.project_id,
                    EventEntity::Reservation,
                    reservation.id,
                    EventType::ReservationCreated,
                    json!({
                        "task_id": task.id,
                        "assignee_agent_id": agent_id,
                        "expires_at": reservation.expires_at,
                    }),
                )
                .with_correlation(correlation_id.map(str::to_string)),
                &now.to_rfc3339(),
            )
            .await?,
        );

        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                task.project_id,
                corr,
                "assign",
                &serde_json::to_value(&reservation)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(reservation)
    }

    /// Explicit reservation release: Reserved -> Ready.
    pub async fn release_reservation(&self, principal: &Principal, task_id: Uuid) -> CoreResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        principal.require(Capability::ScheduleAssign, Some(task.project_id))?;

        let reservation = lease_repository::fetch_active_reservation(&mut tx, task.id)
            .await?
            .ok_or_else(|| {
                CoreError::PreconditionFailed(format!("task {task_id} has no active reservation"))
            })?;
        lease_repository::set_reservation_status(
            &mut tx,
            reservation.id,
            ReservationStatus::Released,
            &now.to_rfc3339(),
        )
        .await?;

        let mut outbox = Vec::new();
        if task.state == TaskState::Reserved {
            let ctx = TransitionCtx {
                actor_id: Some(principal.actor_id.as_str()),
                reason: Some("reservation released"),
                ..TransitionCtx::default()
            };
            apply_transition(&mut tx, &mut task, TaskState::Ready, now, ctx, &mut outbox).await?;
        }
        outbox.push(
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    task.project_id,
                    EventEntity::Reservation,
                    reservation.id,
                    EventType::ReservationReleased,
                    json!({ "task_id": task.id }),
                ),
                &now.to_rfc3339(),
            )
            .await?,
        );
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(())
    }

    /// Extend an active lease to `now + ttl`. PLAN_STALE when the caller's
    /// view predates the task's latest material plan change.
    pub async fn heartbeat(&self, token: &str, seen_plan_version: i64) -> CoreResult<Lease> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut lease = require_active_lease(&mut tx, token, now).await?;
        let task = task_repository::get(&mut tx, lease.task_id).await?;
        if seen_plan_version < task.last_material_plan_version {
            return Err(CoreError::PlanStale {
                seen: seen_plan_version,
                current: task.last_material_plan_version,
            });
        }
        lease.extend(now);
        lease_repository::update_lease(&mut tx, &lease).await?;
        tx.commit().await?;
        Ok(lease)
    }

    /// Voluntary release: Claimed -> Ready, fencing bumped, lease closed.
    pub async fn release_lease(&self, principal: &Principal, token: &str) -> CoreResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let lease = require_active_lease(&mut tx, token, now).await?;
        principal.require(Capability::SchedulePull, Some(lease.project_id))?;
        let mut task = task_repository::get(&mut tx, lease.task_id).await?;

        if task.state != TaskState::Claimed {
            return Err(CoreError::PreconditionFailed(format!(
                "lease release requires a claimed task; task {} is {} (abandon instead)",
                task.id,
                task.state.as_str()
            )));
        }

        let mut released = lease.clone();
        released.status = LeaseStatus::Released;
        released.updated_at = now;
        lease_repository::update_lease(&mut tx, &released).await?;
        task.fencing_counter += 1;
        task.claimed_by = None;

        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(lease.agent_id.as_str()),
            reason: Some("lease released"),
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::Ready, now, ctx, &mut outbox).await?;
        outbox.push(
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    task.project_id,
                    EventEntity::Lease,
                    lease.id,
                    EventType::LeaseReleased,
                    json!({ "task_id": task.id }),
                ),
                &now.to_rfc3339(),
            )
            .await?,
        );
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(())
    }

    /// Expiry sweep: close lapsed leases, bump fencing, return Claimed tasks
    /// to Ready. Tasks that progressed past Claimed keep their state; their
    /// dead holder is fenced out regardless. Returns leases expired.
    pub async fn sweep_expired_leases(&self) -> CoreResult<u64> {
        let now = self.clock.now();
        let batch = self.config.sweep.batch_size;
        let mut swept = 0;

        let expired = {
            let mut conn = self.pool.acquire().await?;
            lease_repository::expired_leases(&mut conn, &now.to_rfc3339(), batch).await?
        };

        for lease in expired {
            let result = self.expire_one_lease(&lease, now).await;
            match result {
                Ok(()) => swept += 1,
                Err(e) => warn!(lease_id = %lease.id, error = %e, "lease expiry failed; will retry next sweep"),
            }
        }
        Ok(swept)
    }

    async fn expire_one_lease(&self, lease: &Lease, now: DateTime<Utc>) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        // Re-check under the transaction; a heartbeat may have extended it.
        let Some(current) = lease_repository::fetch_by_token(&mut tx, &lease.token).await? else {
            return Ok(());
        };
        if current.status != LeaseStatus::Active || !current.is_expired(now) {
            return Ok(());
        }

        let mut expired = current.clone();
        expired.status = LeaseStatus::Expired;
        expired.updated_at = now;
        lease_repository::update_lease(&mut tx, &expired).await?;

        let mut task = task_repository::get(&mut tx, current.task_id).await?;
        task.fencing_counter += 1;

        let mut outbox = Vec::new();
        if task.state == TaskState::Claimed {
            task.claimed_by = None;
            let ctx = TransitionCtx {
                reason: Some("lease expired"),
                ..TransitionCtx::default()
            };
            apply_transition(&mut tx, &mut task, TaskState::Ready, now, ctx, &mut outbox).await?;
        } else {
            task.updated_at = now;
            task_repository::update(&mut tx, &task).await?;
        }
        outbox.push(
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    task.project_id,
                    EventEntity::Lease,
                    current.id,
                    EventType::LeaseExpired,
                    json!({
                        "task_id": task.id,
                        "agent_id": current.agent_id,
                        "fencing_counter": task.fencing_counter,
                    }),
                ),
                &now.to_rfc3339(),
            )
            .await?,
        );
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(())
    }

    /// Reservation sweep: each lapsed reservation returns its task to Ready
    /// exactly once.
    pub async fn sweep_expired_reservations(&self) -> CoreResult<u64> {
        let now = self.clock.now();
        let batch = self.config.sweep.batch_size;
        let mut swept = 0;

        let expired = {
            let mut conn = self.pool.acquire().await?;
            lease_repository::expired_reservations(&mut conn, &now.to_rfc3339(), batch).await?
        };

        for reservation in expired {
            match self.expire_one_reservation(&reservation, now).await {
                Ok(()) => swept += 1,
                Err(e) => warn!(
                    reservation_id = %reservation.id,
                    error = %e,
                    "reservation expiry failed; will retry next sweep"
                ),
            }
        }
        Ok(swept)
    }

    async fn expire_one_reservation(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let Some(current) = lease_repository::fetch_active_reservation(&mut tx, reservation.task_id).await?
        else {
            return Ok(());
        };
        if current.id != reservation.id || !current.is_expired(now) {
            return Ok(());
        }

        lease_repository::set_reservation_status(
            &mut tx,
            current.id,
            ReservationStatus::Expired,
            &now.to_rfc3339(),
        )
        .await?;

        let mut task = task_repository::get(&mut tx, current.task_id).await?;
        let mut outbox = Vec::new();
        if task.state == TaskState::Reserved {
            let ctx = TransitionCtx {
                reason: Some("reservation expired"),
                ..TransitionCtx::default()
            };
            apply_transition(&mut tx, &mut task, TaskState::Ready, now, ctx, &mut outbox).await?;
        }
        outbox.push(
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    task.project_id,
                    EventEntity::Reservation,
                    current.id,
                    EventType::ReservationExpired,
                    json!({ "task_id": task.id, "assignee_agent_id": current.assignee_agent_id }),
                ),
                &now.to_rfc3339(),
            )
            .await?,
        );
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ready_task(priority: i32, short_id: &str, ready_minutes_ago: i64) -> Task {
        let mut t = Task::new(Uuid::new_v4(), short_id);
        t.short_id = short_id.to_string();
        t.priority = priority;
        t.state = TaskState::Ready;
        t.ready_at = Some(Utc::now() - Duration::minutes(ready_minutes_ago));
        t
    }

    #[test]
    fn priority_dominates_ranking() {
        let now = Utc::now();
        let urgent = ready_task(1, "P1.M1.T2", 0);
        let old_but_low = ready_task(50, "P1.M1.T1", 600);
        assert!(rank_key(&urgent, now, &[]) < rank_key(&old_but_low, now, &[]));
    }

    #[test]
    fn aging_breaks_priority_ties() {
        let now = Utc::now();
        let fresh = ready_task(10, "P1.M1.T1", 1);
        let aged = ready_task(10, "P1.M1.T2", 120);
        assert!(rank_key(&aged, now, &[]) < rank_key(&fresh, now, &[]));
    }

    #[test]
    fn contention_penalizes_overlapping_paths() {
        let now = Utc::now();
        let mut contended = ready_task(10, "P1.M1.T1", 5);
        contended.exclusive_paths = vec!["src/db.rs".into()];
        let clear = ready_task(10, "P1.M1.T2", 5);
        let active = vec!["src/db.rs".to_string()];
        assert!(rank_key(&clear, now, &active) < rank_key(&contended, now, &active));
    }

    #[test]
    fn short_id_stabilizes_equal_ranks() {
        let now = Utc::now();
        let a = ready_task(10, "P1.M1.T1", 5);
        let b = ready_task(10, "P1.M1.T2", 5);
        assert!(rank_key(&a, now, &[]) < rank_key(&b, now, &[]));
    }
}
