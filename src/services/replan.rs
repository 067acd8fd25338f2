//! Replan engine (C5): plan change sets.
//!
//! Validation simulates the batch against an in-memory copy of the project
//! graph and computes the impact preview without committing anything. Apply
//! is serialized by the project's plan-version row: the conditional bump
//! fails fast with PLAN_VERSION_CONFLICT, and every operation, hold
//! invalidation, plan version row, and event lands in one transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::adapters::sqlite::{
    context_repository, edge_repository, event_repository, gate_repository, lease_repository,
    plan_repository, project_repository, task_repository,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    Capability, ChangeSetStatus, EventDraft, EventEntity, EventRecord, EventType, ImpactPreview,
    LeaseStatus, PlanChangeSet, PlanOperation, PlanVersion, Principal, ReservationStatus, Task,
    TaskState,
};
use crate::domain::ports::Clock;

use super::dag_service::{insert_edge_checked, insert_task_from_spec, is_reachable};
use super::event_log::EventLog;
use super::lifecycle::{apply_transition, require_active_project, TransitionCtx};
use super::scheduler;

/// Result of an applied change set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedChangeSet {
    pub change_set_id: Uuid,
    pub plan_version: i64,
    pub released_holds: Vec<Uuid>,
    pub stale_in_progress: Vec<Uuid>,
}

pub struct ReplanEngine {
    pool: SqlitePool,
    events: EventLog,
    clock: Arc<dyn Clock>,
}

impl ReplanEngine {
    pub fn new(pool: SqlitePool, events: EventLog, clock: Arc<dyn Clock>) -> Self {
        Self { pool, events, clock }
    }

    /// Record a draft change set pinned to the project's current plan
    /// version.
    pub async fn submit_change_set(
        &self,
        principal: &Principal,
        project_id: Uuid,
        operations: Vec<PlanOperation>,
        correlation_id: Option<&str>,
    ) -> CoreResult<PlanChangeSet> {
        principal.require(Capability::ReplanSubmit, Some(project_id))?;
        if operations.is_empty() {
            return Err(CoreError::InvalidArgument("change set has no operations".into()));
        }
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, project_id, corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }
        let project = project_repository::get(&mut tx, project_id).await?;
        require_active_project(&project)?;

        let mut change_set = PlanChangeSet::draft(
            project_id,
            project.plan_version,
            operations,
            Some(principal.actor_id.clone()),
        );
        change_set.created_at = now;
        change_set.updated_at = now;
        plan_repository::insert_change_set(&mut tx, &change_set).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                project_id,
                EventEntity::ChangeSet,
                change_set.id,
                EventType::ChangeSetSubmitted,
                json!({
                    "base_plan_version": change_set.base_plan_version,
                    "operation_count": change_set.operations.len(),
                }),
            )
            .with_correlation(correlation_id.map(str::to_string)),
            &now.to_rfc3339(),
        )
        .await?;
        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                project_id,
                corr,
                "submit_change_set",
                &serde_json::to_value(&change_set)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(change_set)
    }

    /// Validate the change set and persist its impact preview. Moves the
    /// change set to `validated`, or `rejected` when an invariant fails.
    pub async fn preview(
        &self,
        principal: &Principal,
        change_set_id: Uuid,
    ) -> CoreResult<ImpactPreview> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        // Resolve to the owning project before scope enforcement.
        let mut change_set = plan_repository::fetch_change_set(&mut tx, change_set_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidArgument(format!("change set {change_set_id} not found"))
            })?;
        principal.require(Capability::ReplanSubmit, Some(change_set.project_id))?;

        if change_set.status == ChangeSetStatus::Applied {
            return Err(CoreError::PreconditionFailed(format!(
                "change set {change_set_id} already applied"
            )));
        }

        match simulate(&mut tx, &change_set, now).await {
            Ok(preview) => {
                change_set.status = ChangeSetStatus::Validated;
                change_set.impact_preview = Some(preview.clone());
                change_set.updated_at = now;
                plan_repository::update_change_set(&mut tx, &change_set).await?;
                let record = event_repository::append(
                    &mut tx,
                    &EventDraft::new(
                        change_set.project_id,
                        EventEntity::ChangeSet,
                        change_set.id,
                        EventType::ChangeSetValidated,
                        serde_json::to_value(&preview)?,
                    ),
                    &now.to_rfc3339(),
                )
                .await?;
                tx.commit().await?;
                self.events.publish_all(vec![record]);
                Ok(preview)
            }
            Err(reason) => {
                change_set.status = ChangeSetStatus::Rejected;
                change_set.updated_at = now;
                plan_repository::update_change_set(&mut tx, &change_set).await?;
                let record = event_repository::append(
                    &mut tx,
                    &EventDraft::new(
                        change_set.project_id,
                        EventEntity::ChangeSet,
                        change_set.id,
                        EventType::ChangeSetRejected,
                        json!({ "error": reason.kind(), "detail": reason.to_string() }),
                    ),
                    &now.to_rfc3339(),
                )
                .await?;
                tx.commit().await?;
                self.events.publish_all(vec![record]);
                Err(reason)
            }
        }
    }

    /// Atomically apply a validated change set and bump the plan version.
    pub async fn apply(
        &self,
        principal: &Principal,
        change_set_id: Uuid,
        correlation_id: Option<&str>,
    ) -> CoreResult<AppliedChangeSet> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut change_set = plan_repository::fetch_change_set(&mut tx, change_set_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidArgument(format!("change set {change_set_id} not found"))
            })?;
        principal.require(Capability::ReplanApply, Some(change_set.project_id))?;
        let project_id = change_set.project_id;

        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, project_id, corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }

        let project = project_repository::get(&mut tx, project_id).await?;
        require_active_project(&project)?;
        match change_set.status {
            ChangeSetStatus::Validated => {}
            ChangeSetStatus::Applied => {
                return Err(CoreError::PreconditionFailed(format!(
                    "change set {change_set_id} already applied"
                )))
            }
            other => {
                return Err(CoreError::PreconditionFailed(format!(
                    "change set {change_set_id} is {}; preview it first",
                    other.as_str()
                )))
            }
        }

        // Serialize replans and reject stale bases in one conditional bump.
        let target = project_repository::bump_plan_version(
            &mut tx,
            project_id,
            change_set.base_plan_version,
            &now.to_rfc3339(),
        )
        .await?;

        // Re-validate under the plan lock; concurrent writes since preview
        // may have invalidated the batch.
        simulate(&mut tx, &change_set, now).await?;

        let mut outbox = Vec::new();
        let mut material: HashSet<Uuid> = HashSet::new();
        let mut refresh: HashSet<Uuid> = HashSet::new();

        for operation in change_set.operations.clone() {
            self.apply_operation(
                &mut tx,
                project_id,
                target,
                &operation,
                now,
                &mut material,
                &mut refresh,
                &mut outbox,
            )
            .await?;
            outbox.push(
                event_repository::append(
                    &mut tx,
                    &EventDraft::new(
                        project_id,
                        EventEntity::ChangeSet,
                        change_set.id,
                        EventType::PlanOperationApplied,
                        json!({
                            "op": operation.kind(),
                            "target_task": operation.target_task(),
                            "plan_version": target,
                        }),
                    )
                    .with_correlation(correlation_id.map(str::to_string)),
                    &now.to_rfc3339(),
                )
                .await?,
            );
        }

        let (released, stale) = self
            .invalidate_material_holds(&mut tx, &material, target, now, &mut outbox)
            .await?;
        refresh.extend(material.iter().copied());

        let refresh_ids: Vec<Uuid> = refresh.into_iter().collect();
        scheduler::refresh_readiness(&mut tx, &refresh_ids, now, &mut outbox).await?;

        // Open gates watching changed candidates get a fresh risk summary.
        let changed: Vec<Uuid> = refresh_ids.clone();
        for gate_id in gate_repository::gates_watching_tasks(&mut tx, &changed).await? {
            let candidates = gate_repository::candidates_for_gate(&mut tx, gate_id).await?;
            let mut ready = 0u32;
            let mut blocked = 0u32;
            for candidate in &candidates {
                if let Some(task) = task_repository::fetch(&mut tx, *candidate).await? {
                    match task.state {
                        TaskState::Ready => ready += 1,
                        TaskState::Blocked | TaskState::Backlog => blocked += 1,
                        _ => {}
                    }
                }
            }
            outbox.push(
                event_repository::append(
                    &mut tx,
                    &EventDraft::new(
                        project_id,
                        EventEntity::Gate,
                        gate_id,
                        EventType::GateRiskSummary,
                        json!({
                            "ready_candidates": ready,
                            "blocked_candidates": blocked,
                            "plan_version": target,
                        }),
                    ),
                    &now.to_rfc3339(),
                )
                .await?,
            );
        }

        let plan_version = PlanVersion {
            id: Uuid::new_v4(),
            project_id,
            version_number: target,
            change_set_id: change_set.id,
            created_at: now,
        };
        plan_repository::insert_plan_version(&mut tx, &plan_version).await?;

        change_set.status = ChangeSetStatus::Applied;
        change_set.target_plan_version = Some(target);
        change_set.updated_at = now;
        plan_repository::update_change_set(&mut tx, &change_set).await?;

        // Any edge mutation can reshape bounded subgraphs project-wide.
        context_repository::evict_project(&mut tx, project_id).await?;

        outbox.push(
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    project_id,
                    EventEntity::ChangeSet,
                    change_set.id,
                    EventType::ChangeSetApplied,
                    json!({
                        "plan_version": target,
                        "operation_count": change_set.operations.len(),
                        "released_holds": released,
                        "stale_in_progress": stale,
                    }),
                )
                .with_correlation(correlation_id.map(str::to_string)),
                &now.to_rfc3339(),
            )
            .await?,
        );

        let applied = AppliedChangeSet {
            change_set_id: change_set.id,
            plan_version: target,
            released_holds: released,
            stale_in_progress: stale,
        };
        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                project_id,
                corr,
                "apply_change_set",
                &serde_json::to_value(&applied)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(applied)
    }

    /// Toggle the project's replan barrier. While up, claims are refused;
    /// heartbeats and completions proceed.
    pub async fn set_barrier(
        &self,
        principal: &Principal,
        project_id: Uuid,
        active: bool,
    ) -> CoreResult<()> {
        principal.require(Capability::ReplanApply, Some(project_id))?;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        project_repository::set_replan_barrier(&mut tx, project_id, active, &now.to_rfc3339())
            .await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                project_id,
                EventEntity::Project,
                project_id,
                EventType::ReplanBarrierSet,
                json!({ "active": active, "actor_id": principal.actor_id }),
            ),
            &now.to_rfc3339(),
        )
        .await?;
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_operation(
        &self,
        tx: &mut SqliteConnection,
        project_id: Uuid,
        target_version: i64,
        operation: &PlanOperation,
        now: DateTime<Utc>,
        material: &mut HashSet<Uuid>,
        refresh: &mut HashSet<Uuid>,
        outbox: &mut Vec<EventRecord>,
    ) -> CoreResult<()> {
        match operation {
            PlanOperation::AddTask { spec } => {
                let task =
                    insert_task_from_spec(tx, project_id, target_version, spec, now, outbox).await?;
                refresh.insert(task.id);
            }
            PlanOperation::RemoveTask { task_id } => {
                let task = task_repository::get(tx, *task_id).await?;
                ensure_removable(&task)?;
                if task_repository::count_artifacts(tx, task.id).await? > 0 {
                    return Err(CoreError::PreconditionFailed(format!(
                        "task {} has recorded artifacts; deprecate it instead of removing",
                        task.id
                    )));
                }
                let dependents: Vec<Uuid> = edge_repository::outgoing(tx, task.id)
                    .await?
                    .into_iter()
                    .map(|e| e.to_task_id)
                    .collect();
                task_repository::delete(tx, task.id).await?;
                refresh.extend(dependents);
                outbox.push(
                    event_repository::append(
                        tx,
                        &EventDraft::new(
                            project_id,
                            EventEntity::Task,
                            task.id,
                            EventType::TaskRemoved,
                            json!({ "short_id": task.short_id }),
                        ),
                        &now.to_rfc3339(),
                    )
                    .await?,
                );
            }
            PlanOperation::UpdateTask { task_id, changes } => {
                let mut task = task_repository::get(tx, *task_id).await?;
                if changes.is_material_for(&task) {
                    material.insert(task.id);
                }
                changes.apply_to(&mut task);
                task.version += 1;
                task.updated_at = now;
                task_repository::update(tx, &task).await?;
            }
            PlanOperation::AddEdge { from_task_id, to_task_id, unlock_on } => {
                insert_edge_checked(tx, project_id, *from_task_id, *to_task_id, *unlock_on, now, outbox)
                    .await?;
                material.insert(*to_task_id);
                refresh.insert(*to_task_id);
            }
            PlanOperation::RemoveEdge { from_task_id, to_task_id } => {
                if !edge_repository::remove(tx, project_id, *from_task_id, *to_task_id).await? {
                    return Err(CoreError::InvalidArgument(format!(
                        "no dependency edge {from_task_id} -> {to_task_id}"
                    )));
                }
                material.insert(*to_task_id);
                refresh.insert(*to_task_id);
                outbox.push(
                    event_repository::append(
                        tx,
                        &EventDraft::new(
                            project_id,
                            EventEntity::Edge,
                            *to_task_id,
                            EventType::EdgeRemoved,
                            json!({ "from_task_id": from_task_id, "to_task_id": to_task_id }),
                        ),
                        &now.to_rfc3339(),
                    )
                    .await?,
                );
            }
            PlanOperation::Reprioritize { task_id, priority } => {
                // Priority-only: never material, holds survive.
                let mut task = task_repository::get(tx, *task_id).await?;
                task.priority = *priority;
                task.version += 1;
                task.updated_at = now;
                task_repository::update(tx, &task).await?;
            }
            PlanOperation::Postpone { task_id, reason } => {
                let mut task = task_repository::get(tx, *task_id).await?;
                if task.state == TaskState::Ready {
                    let ctx = TransitionCtx {
                        reason: Some(reason.as_deref().unwrap_or("postponed")),
                        ..TransitionCtx::default()
                    };
                    apply_transition(tx, &mut task, TaskState::Blocked, now, ctx, outbox).await?;
                }
            }
            PlanOperation::Deprecate { task_id, reason } => {
                let mut task = task_repository::get(tx, *task_id).await?;
                task.deprecated_in_plan_version = Some(target_version);
                task.updated_at = now;
                task_repository::update(tx, &task).await?;
                match task.state {
                    TaskState::Claimed | TaskState::Reserved => {
                        // Hold invalidation plus cancellation, both below.
                        material.insert(task.id);
                    }
                    TaskState::Backlog | TaskState::Ready => {
                        let ctx = TransitionCtx {
                            reason: Some(reason.as_deref().unwrap_or("deprecated")),
                            ..TransitionCtx::default()
                        };
                        apply_transition(tx, &mut task, TaskState::Cancelled, now, ctx, outbox)
                            .await?;
                    }
                    // Running or finished work keeps its state; the marker
                    // and PLAN_STALE heartbeats carry the signal.
                    _ => {
                        material.insert(task.id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Release holds on materially changed Claimed/Reserved tasks and mark
    /// the material plan version everywhere it applies. InProgress tasks are
    /// never aborted; their snapshots keep governing.
    async fn invalidate_material_holds(
        &self,
        tx: &mut SqliteConnection,
        material: &HashSet<Uuid>,
        target_version: i64,
        now: DateTime<Utc>,
        outbox: &mut Vec<EventRecord>,
    ) -> CoreResult<(Vec<Uuid>, Vec<Uuid>)> {
        let mut released = Vec::new();
        let mut stale_in_progress = Vec::new();

        for &task_id in material {
            let Some(mut task) = task_repository::fetch(tx, task_id).await? else {
                continue;
            };
            task.last_material_plan_version = target_version;

            match task.state {
                TaskState::Claimed | TaskState::Reserved => {
                    if let Some(lease) = lease_repository::fetch_active_for_task(tx, task.id).await? {
                        let mut closed = lease;
                        closed.status = LeaseStatus::Released;
                        closed.updated_at = now;
                        lease_repository::update_lease(tx, &closed).await?;
                    }
                    if let Some(reservation) =
                        lease_repository::fetch_active_reservation(tx, task.id).await?
                    {
                        lease_repository::set_reservation_status(
                            tx,
                            reservation.id,
                            ReservationStatus::Released,
                            &now.to_rfc3339(),
                        )
                        .await?;
                    }
                    task.fencing_counter += 1;
                    task.claimed_by = None;
                    let ctx = TransitionCtx {
                        reason: Some("material plan change"),
                        ..TransitionCtx::default()
                    };
                    apply_transition(tx, &mut task, TaskState::Ready, now, ctx, outbox).await?;
                    outbox.push(
                        event_repository::append(
                            tx,
                            &EventDraft::new(
                                task.project_id,
                                EventEntity::Task,
                                task.id,
                                EventType::HoldReleasedByReplan,
                                json!({
                                    "short_id": task.short_id,
                                    "fencing_counter": task.fencing_counter,
                                    "plan_version": target_version,
                                }),
                            ),
                            &now.to_rfc3339(),
                        )
                        .await?,
                    );
                    released.push(task.id);

                    // A deprecated task released from a hold is withdrawn.
                    if task.deprecated_in_plan_version == Some(target_version) {
                        let ctx = TransitionCtx {
                            reason: Some("deprecated"),
                            ..TransitionCtx::default()
                        };
                        apply_transition(tx, &mut task, TaskState::Cancelled, now, ctx, outbox)
                            .await?;
                    }
                }
                TaskState::InProgress => {
                    task.updated_at = now;
                    task_repository::update(tx, &task).await?;
                    stale_in_progress.push(task.id);
                }
                _ => {
                    task.updated_at = now;
                    task_repository::update(tx, &task).await?;
                }
            }
        }

        released.sort();
        stale_in_progress.sort();
        Ok((released, stale_in_progress))
    }
}

fn ensure_removable(task: &Task) -> CoreResult<()> {
    if !matches!(
        task.state,
        TaskState::Backlog | TaskState::Ready | TaskState::Blocked | TaskState::Cancelled
    ) {
        return Err(CoreError::PreconditionFailed(format!(
            "task {} is {}; deprecate it instead of removing",
            task.id,
            task.state.as_str()
        )));
    }
    Ok(())
}

/// Simulate the change set against an in-memory copy of the graph, enforcing
/// every DAG invariant, and compute the impact preview.
async fn simulate(
    conn: &mut SqliteConnection,
    change_set: &PlanChangeSet,
    now: DateTime<Utc>,
) -> CoreResult<ImpactPreview> {
    let project_id = change_set.project_id;
    let all_tasks =
        task_repository::list(conn, project_id, &crate::adapters::sqlite::TaskFilter::default())
            .await?;
    let all_edges = edge_repository::list_for_project(conn, project_id).await?;

    let mut tasks: HashMap<Uuid, Task> = all_tasks.into_iter().map(|t| (t.id, t)).collect();
    let mut edges: HashMap<(Uuid, Uuid), crate::domain::models::UnlockOn> = all_edges
        .into_iter()
        .map(|e| ((e.from_task_id, e.to_task_id), e.unlock_on))
        .collect();

    let ready_before: HashSet<Uuid> = tasks
        .values()
        .filter(|t| t.state == TaskState::Ready)
        .map(|t| t.id)
        .collect();

    let mut material: HashSet<Uuid> = HashSet::new();
    let mut removed: HashSet<Uuid> = HashSet::new();

    for operation in &change_set.operations {
        match operation {
            PlanOperation::AddTask { spec } => {
                if spec.title.trim().is_empty() {
                    return Err(CoreError::InvalidArgument("task title cannot be empty".into()));
                }
                let mut task = Task::new(project_id, spec.title.clone());
                task.priority = spec.priority;
                task.task_class = spec.task_class;
                task.capability_tags = spec.capability_tags.clone();
                task.created_at = now;
                task.updated_at = now;
                tasks.insert(task.id, task);
            }
            PlanOperation::RemoveTask { task_id } => {
                let task = tasks.get(task_id).ok_or(CoreError::TaskNotFound(*task_id))?;
                ensure_removable(task)?;
                if task_repository::count_artifacts(conn, task.id).await? > 0 {
                    return Err(CoreError::PreconditionFailed(format!(
                        "task {} has recorded artifacts; deprecate it instead of removing",
                        task.id
                    )));
                }
                removed.insert(*task_id);
                tasks.remove(task_id);
                edges.retain(|(from, to), _| from != task_id && to != task_id);
            }
            PlanOperation::UpdateTask { task_id, changes } => {
                let task = tasks.get_mut(task_id).ok_or(CoreError::TaskNotFound(*task_id))?;
                if changes.is_material_for(task) {
                    material.insert(*task_id);
                }
                changes.apply_to(task);
            }
            PlanOperation::AddEdge { from_task_id, to_task_id, unlock_on } => {
                let from = *from_task_id;
                let to = *to_task_id;
                if !tasks.contains_key(&from) {
                    return Err(CoreError::DependencyTaskNotFound(from));
                }
                if !tasks.contains_key(&to) {
                    return Err(CoreError::DependencyTaskNotFound(to));
                }
                if from == to {
                    return Err(CoreError::CycleDetected { from, to });
                }
                if edges.contains_key(&(from, to)) {
                    return Err(CoreError::InvalidArgument(format!(
                        "dependency edge {from} -> {to} already exists"
                    )));
                }
                let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
                for (f, t) in edges.keys() {
                    adjacency.entry(*f).or_default().push(*t);
                }
                if is_reachable(to, from, &adjacency) {
                    return Err(CoreError::CycleDetected { from, to });
                }
                edges.insert((from, to), *unlock_on);
                material.insert(to);
            }
            PlanOperation::RemoveEdge { from_task_id, to_task_id } => {
                if edges.remove(&(*from_task_id, *to_task_id)).is_none() {
                    return Err(CoreError::InvalidArgument(format!(
                        "no dependency edge {from_task_id} -> {to_task_id}"
                    )));
                }
                material.insert(*to_task_id);
            }
            PlanOperation::Reprioritize { task_id, priority } => {
                let task = tasks.get_mut(task_id).ok_or(CoreError::TaskNotFound(*task_id))?;
                task.priority = *priority;
            }
            PlanOperation::Postpone { task_id, .. } => {
                let task = tasks.get_mut(task_id).ok_or(CoreError::TaskNotFound(*task_id))?;
                if !matches!(task.state, TaskState::Backlog | TaskState::Ready) {
                    return Err(CoreError::PreconditionFailed(format!(
                        "task {} is {}; only unstarted tasks can be postponed",
                        task.id,
                        task.state.as_str()
                    )));
                }
                if task.state == TaskState::Ready {
                    task.state = TaskState::Blocked;
                }
            }
            PlanOperation::Deprecate { task_id, .. } => {
                let task = tasks.get_mut(task_id).ok_or(CoreError::TaskNotFound(*task_id))?;
                if matches!(task.state, TaskState::Backlog | TaskState::Ready) {
                    task.state = TaskState::Cancelled;
                } else {
                    material.insert(*task_id);
                }
            }
        }
    }

    // Post-simulation readiness eligibility.
    let eligible = |task: &Task, tasks: &HashMap<Uuid, Task>| -> bool {
        edges
            .iter()
            .filter(|((_, to), _)| *to == task.id)
            .all(|((from, _), unlock)| {
                tasks
                    .get(from)
                    .map(|source| unlock.satisfied_by(source.state))
                    .unwrap_or(true)
            })
    };

    let mut newly_ready = Vec::new();
    let mut newly_blocked = Vec::new();
    for task in tasks.values() {
        let was_ready = ready_before.contains(&task.id);
        let now_ready = match task.state {
            TaskState::Backlog | TaskState::Ready => eligible(task, &tasks),
            _ => false,
        };
        match (was_ready, now_ready) {
            (false, true) => newly_ready.push(task.id),
            (true, false) => newly_blocked.push(task.id),
            _ => {}
        }
    }
    for id in &removed {
        if ready_before.contains(id) {
            newly_blocked.push(*id);
        }
    }

    let mut released_holds = Vec::new();
    let mut stale_in_progress = Vec::new();
    for &id in &material {
        if let Some(task) = tasks.get(&id) {
            match task.state {
                TaskState::Claimed | TaskState::Reserved => released_holds.push(id),
                TaskState::InProgress => stale_in_progress.push(id),
                _ => {}
            }
        }
    }

    let touched: Vec<Uuid> = material.iter().copied().collect();
    let gate_implications = gate_repository::gates_watching_tasks(conn, &touched).await?;

    newly_ready.sort();
    newly_blocked.sort();
    released_holds.sort();
    stale_in_progress.sort();

    let ready_queue_delta =
        (newly_ready.len() as i64 + released_holds.len() as i64) - newly_blocked.len() as i64;

    Ok(ImpactPreview {
        newly_blocked,
        newly_ready,
        ready_queue_delta,
        released_holds,
        stale_in_progress,
        gate_implications,
        extras: HashMap::new(),
    })
}
