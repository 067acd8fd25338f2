//! DAG store (C2): projects, phases, milestones, tasks, and dependency
//! edges, with the structural invariants enforced transactionally on write:
//! referential project consistency, deterministic short ids, and cycle-free
//! edges.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::adapters::sqlite::{
    edge_repository, event_repository, hierarchy_repository, project_repository, task_repository,
    TaskFilter,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    task_short_id, Capability, DependencyEdge, EventDraft, EventEntity, EventType, Milestone,
    NewTaskSpec, Phase, Principal, Project, Task, TaskChanges, UnlockOn,
};
use crate::domain::ports::Clock;

use super::event_log::EventLog;
use super::lifecycle::require_active_project;
use super::scheduler;

/// Depth-first reachability: true if `target` is reachable from `start` in
/// the adjacency map. Used to reject an edge whose reverse path already
/// exists (the candidate edge would close a cycle).
pub(crate) fn is_reachable(
    start: Uuid,
    target: Uuid,
    adjacency: &HashMap<Uuid, Vec<Uuid>>,
) -> bool {
    let mut stack = vec![start];
    let mut visited = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(&node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

/// CYCLE_DETECTED if adding `from -> to` to the project's edge set would
/// create a cycle (including the self-loop case).
pub(crate) async fn ensure_acyclic(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    from: Uuid,
    to: Uuid,
) -> CoreResult<()> {
    if from == to {
        return Err(CoreError::CycleDetected { from, to });
    }
    let edges = edge_repository::list_for_project(conn, project_id).await?;
    let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in &edges {
        adjacency.entry(edge.from_task_id).or_default().push(edge.to_task_id);
    }
    // The candidate edge closes a cycle iff `from` is already reachable
    // from `to`.
    if is_reachable(to, from, &adjacency) {
        return Err(CoreError::CycleDetected { from, to });
    }
    Ok(())
}

pub struct DagService {
    pool: SqlitePool,
    events: EventLog,
    clock: Arc<dyn Clock>,
}

impl DagService {
    pub fn new(pool: SqlitePool, events: EventLog, clock: Arc<dyn Clock>) -> Self {
        Self { pool, events, clock }
    }

    /// Bootstrap-only: project creation is not available to project-scoped
    /// principals.
    pub async fn create_project(
        &self,
        principal: &Principal,
        name: &str,
        correlation_id: Option<&str>,
    ) -> CoreResult<Project> {
        principal.require(Capability::ProjectCreate, None)?;
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("project name cannot be empty".into()));
        }
        let now = self.clock.now();
        let mut project = Project::new(name);
        project.created_at = now;
        project.updated_at = now;

        let mut tx = self.pool.begin().await?;
        // Project creation predates its own id; the bootstrap scope (nil)
        // keys its idempotency ledger.
        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, Uuid::nil(), corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }
        project_repository::insert(&mut tx, &project).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                project.id,
                EventEntity::Project,
                project.id,
                EventType::ProjectCreated,
                json!({ "name": project.name, "actor_id": principal.actor_id }),
            )
            .with_correlation(correlation_id.map(str::to_string)),
            &now.to_rfc3339(),
        )
        .await?;
        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                Uuid::nil(),
                corr,
                "create_project",
                &serde_json::to_value(&project)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(project)
    }

    pub async fn get_project(&self, principal: &Principal, project_id: Uuid) -> CoreResult<Project> {
        principal.require(Capability::ProjectRead, Some(project_id))?;
        let mut conn = self.pool.acquire().await?;
        project_repository::get(&mut conn, project_id).await
    }

    /// Admin sees every project; scoped principals see their own.
    pub async fn list_projects(&self, principal: &Principal) -> CoreResult<Vec<Project>> {
        principal.require(Capability::ProjectRead, principal.project_id)?;
        let mut conn = self.pool.acquire().await?;
        let all = project_repository::list(&mut conn).await?;
        Ok(match principal.project_id {
            Some(bound) if !principal.is_admin() => {
                all.into_iter().filter(|p| p.id == bound).collect()
            }
            _ => all,
        })
    }

    pub async fn create_phase(
        &self,
        principal: &Principal,
        project_id: Uuid,
        name: &str,
    ) -> CoreResult<Phase> {
        principal.require(Capability::PlanEdit, Some(project_id))?;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let project = project_repository::get(&mut tx, project_id).await?;
        require_active_project(&project)?;

        let sequence = hierarchy_repository::next_phase_sequence(&mut tx, project_id).await?;
        let mut phase = Phase::new(project_id, name, sequence);
        phase.created_at = now;
        hierarchy_repository::insert_phase(&mut tx, &phase).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                project_id,
                EventEntity::Phase,
                phase.id,
                EventType::PhaseCreated,
                json!({ "short_id": phase.short_id, "name": phase.name }),
            ),
            &now.to_rfc3339(),
        )
        .await?;
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(phase)
    }

    pub async fn create_milestone(
        &self,
        principal: &Principal,
        phase_id: Uuid,
        name: &str,
    ) -> CoreResult<Milestone> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        // Resolve the phase to its project before scope enforcement.
        let phase = hierarchy_repository::fetch_phase(&mut tx, phase_id)
            .await?
            .ok_or_else(|| CoreError::InvalidArgument(format!("phase {phase_id} not found")))?;
        principal.require(Capability::PlanEdit, Some(phase.project_id))?;
        let project = project_repository::get(&mut tx, phase.project_id).await?;
        require_active_project(&project)?;

        let sequence = hierarchy_repository::next_milestone_sequence(&mut tx, phase_id).await?;
        let mut milestone =
            Milestone::new(phase.project_id, phase.id, &phase.short_id, name, sequence);
        milestone.created_at = now;
        hierarchy_repository::insert_milestone(&mut tx, &milestone).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                phase.project_id,
                EventEntity::Milestone,
                milestone.id,
                EventType::MilestoneCreated,
                json!({ "short_id": milestone.short_id, "name": milestone.name }),
            ),
            &now.to_rfc3339(),
        )
        .await?;
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(milestone)
    }

    pub async fn list_phases(&self, principal: &Principal, project_id: Uuid) -> CoreResult<Vec<Phase>> {
        principal.require(Capability::ProjectRead, Some(project_id))?;
        let mut conn = self.pool.acquire().await?;
        hierarchy_repository::list_phases(&mut conn, project_id).await
    }

    pub async fn list_milestones(
        &self,
        principal: &Principal,
        phase_id: Uuid,
    ) -> CoreResult<Vec<Milestone>> {
        let mut conn = self.pool.acquire().await?;
        let phase = hierarchy_repository::fetch_phase(&mut conn, phase_id)
            .await?
            .ok_or_else(|| CoreError::InvalidArgument(format!("phase {phase_id} not found")))?;
        principal.require(Capability::ProjectRead, Some(phase.project_id))?;
        hierarchy_repository::list_milestones(&mut conn, phase_id).await
    }

    pub async fn create_task(
        &self,
        principal: &Principal,
        project_id: Uuid,
        spec: NewTaskSpec,
        correlation_id: Option<&str>,
    ) -> CoreResult<Task> {
        principal.require(Capability::PlanEdit, Some(project_id))?;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, project_id, corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }
        let project = project_repository::get(&mut tx, project_id).await?;
        require_active_project(&project)?;

        let mut outbox = Vec::new();
        let task =
            insert_task_from_spec(&mut tx, project_id, project.plan_version, &spec, now, &mut outbox)
                .await?;
        scheduler::refresh_readiness(&mut tx, &[task.id], now, &mut outbox).await?;
        let task = task_repository::get(&mut tx, task.id).await?;

        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                project_id,
                corr,
                "create_task",
                &serde_json::to_value(&task)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(task)
    }

    /// Direct metadata edit outside a change set. Material fields of a held
    /// or running task cannot be edited this way; that path is a replan.
    pub async fn update_task(
        &self,
        principal: &Principal,
        task_id: Uuid,
        changes: TaskChanges,
    ) -> CoreResult<Task> {
        if changes.is_empty() {
            return Err(CoreError::InvalidArgument("no changes supplied".into()));
        }
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        principal.require(Capability::PlanEdit, Some(task.project_id))?;
        let project = project_repository::get(&mut tx, task.project_id).await?;
        require_active_project(&project)?;

        let material = changes.is_material_for(&task);
        if material && (task.state.is_held() || task.state == crate::domain::models::TaskState::InProgress)
        {
            return Err(CoreError::PreconditionFailed(format!(
                "task {} is {}; material edits must go through a plan change set",
                task.id,
                task.state.as_str()
            )));
        }

        changes.apply_to(&mut task);
        task.version += 1;
        task.updated_at = now;
        task_repository::update(&mut tx, &task).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                task.project_id,
                EventEntity::Task,
                task.id,
                EventType::TaskUpdated,
                json!({ "short_id": task.short_id, "material": material }),
            ),
            &now.to_rfc3339(),
        )
        .await?;
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(task)
    }

    pub async fn get_task(&self, principal: &Principal, task_id: Uuid) -> CoreResult<Task> {
        let mut conn = self.pool.acquire().await?;
        let task = task_repository::get(&mut conn, task_id).await?;
        principal.require(Capability::ProjectRead, Some(task.project_id))?;
        Ok(task)
    }

    pub async fn list_tasks(
        &self,
        principal: &Principal,
        project_id: Uuid,
        filter: TaskFilter,
    ) -> CoreResult<Vec<Task>> {
        principal.require(Capability::ProjectRead, Some(project_id))?;
        let mut conn = self.pool.acquire().await?;
        task_repository::list(&mut conn, project_id, &filter).await
    }

    pub async fn add_dependency(
        &self,
        principal: &Principal,
        project_id: Uuid,
        from: Uuid,
        to: Uuid,
        unlock_on: UnlockOn,
        correlation_id: Option<&str>,
    ) -> CoreResult<DependencyEdge> {
        principal.require(Capability::PlanEdit, Some(project_id))?;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, project_id, corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }
        let project = project_repository::get(&mut tx, project_id).await?;
        require_active_project(&project)?;

        let mut outbox = Vec::new();
        let edge = insert_edge_checked(&mut tx, project_id, from, to, unlock_on, now, &mut outbox)
            .await?;
        scheduler::refresh_readiness(&mut tx, &[to], now, &mut outbox).await?;

        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                project_id,
                corr,
                "add_dependency",
                &serde_json::to_value(&edge)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(edge)
    }

    pub async fn remove_dependency(
        &self,
        principal: &Principal,
        project_id: Uuid,
        from: Uuid,
        to: Uuid,
    ) -> CoreResult<()> {
        principal.require(Capability::PlanEdit, Some(project_id))?;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let project = project_repository::get(&mut tx, project_id).await?;
        require_active_project(&project)?;

        if !edge_repository::remove(&mut tx, project_id, from, to).await? {
            return Err(CoreError::InvalidArgument(format!(
                "no dependency edge {from} -> {to}"
            )));
        }
        let mut outbox = vec![
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    project_id,
                    EventEntity::Edge,
                    to,
                    EventType::EdgeRemoved,
                    json!({ "from_task_id": from, "to_task_id": to }),
                ),
                &now.to_rfc3339(),
            )
            .await?,
        ];
        scheduler::refresh_readiness(&mut tx, &[to], now, &mut outbox).await?;
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(())
    }

    /// Full project graph: tasks plus edges.
    pub async fn project_graph(
        &self,
        principal: &Principal,
        project_id: Uuid,
    ) -> CoreResult<(Vec<Task>, Vec<DependencyEdge>)> {
        principal.require(Capability::ProjectRead, Some(project_id))?;
        let mut conn = self.pool.acquire().await?;
        let tasks = task_repository::list(&mut conn, project_id, &TaskFilter::default()).await?;
        let edges = edge_repository::list_for_project(&mut conn, project_id).await?;
        Ok((tasks, edges))
    }
}

/// Build and insert a task from a spec: sequence and short id derive from the
/// milestone (or project) insertion order. Shared with the replan engine.
pub(crate) async fn insert_task_from_spec(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    plan_version: i64,
    spec: &NewTaskSpec,
    now: chrono::DateTime<chrono::Utc>,
    outbox: &mut Vec<crate::domain::models::EventRecord>,
) -> CoreResult<Task> {
    if spec.title.trim().is_empty() {
        return Err(CoreError::InvalidArgument("task title cannot be empty".into()));
    }
    let milestone = match spec.milestone_id {
        Some(id) => Some(
            hierarchy_repository::fetch_milestone(conn, id)
                .await?
                .ok_or_else(|| CoreError::InvalidArgument(format!("milestone {id} not found")))?,
        ),
        None => None,
    };
    if let Some(m) = &milestone {
        if m.project_id != project_id {
            return Err(CoreError::InvalidArgument(format!(
                "milestone {} belongs to another project",
                m.id
            )));
        }
    }

    let sequence = task_repository::next_task_sequence(conn, project_id, spec.milestone_id).await?;
    let mut task = Task::new(project_id, spec.title.clone());
    task.description = spec.description.clone();
    task.phase_id = milestone.as_ref().map(|m| m.phase_id).or(spec.phase_id);
    task.milestone_id = spec.milestone_id;
    task.sequence = sequence;
    task.short_id = task_short_id(milestone.as_ref().map(|m| m.short_id.as_str()), sequence);
    task.priority = spec.priority;
    task.task_class = spec.task_class;
    task.capability_tags = spec.capability_tags.clone();
    task.expected_touches = spec.expected_touches.clone();
    task.exclusive_paths = spec.exclusive_paths.clone();
    task.shared_paths = spec.shared_paths.clone();
    task.work_spec = spec.work_spec.clone();
    task.introduced_in_plan_version = plan_version;
    task.created_at = now;
    task.updated_at = now;
    task.validate()?;

    task_repository::insert(conn, &task).await?;
    outbox.push(
        event_repository::append(
            conn,
            &EventDraft::new(
                project_id,
                EventEntity::Task,
                task.id,
                EventType::TaskCreated,
                json!({
                    "short_id": task.short_id,
                    "title": task.title,
                    "task_class": task.task_class.as_str(),
                }),
            ),
            &now.to_rfc3339(),
        )
        .await?,
    );
    Ok(task)
}

/// Validate and insert a dependency edge: endpoints exist, share the target
/// project, and the result stays acyclic. Shared with the replan engine.
pub(crate) async fn insert_edge_checked(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    from: Uuid,
    to: Uuid,
    unlock_on: UnlockOn,
    now: chrono::DateTime<chrono::Utc>,
    outbox: &mut Vec<crate::domain::models::EventRecord>,
) -> CoreResult<DependencyEdge> {
    let from_task = task_repository::fetch(conn, from)
        .await?
        .ok_or(CoreError::DependencyTaskNotFound(from))?;
    let to_task = task_repository::fetch(conn, to)
        .await?
        .ok_or(CoreError::DependencyTaskNotFound(to))?;
    if from_task.project_id != project_id || to_task.project_id != project_id {
        return Err(CoreError::DependencyProjectMismatch { from, to });
    }
    if edge_repository::exists(conn, project_id, from, to).await? {
        return Err(CoreError::InvalidArgument(format!(
            "dependency edge {from} -> {to} already exists"
        )));
    }
    ensure_acyclic(conn, project_id, from, to).await?;

    let mut edge = DependencyEdge::new(project_id, from, to, unlock_on);
    edge.created_at = now;
    edge_repository::insert(conn, &edge).await?;
    outbox.push(
        event_repository::append(
            conn,
            &EventDraft::new(
                project_id,
                EventEntity::Edge,
                to,
                EventType::EdgeAdded,
                json!({
                    "from_task_id": from,
                    "to_task_id": to,
                    "unlock_on": unlock_on.as_str(),
                }),
            ),
            &now.to_rfc3339(),
        )
        .await?,
    );
    Ok(edge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachability_over_chains() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        adjacency.insert(a, vec![b]);
        adjacency.insert(b, vec![c]);

        assert!(is_reachable(a, c, &adjacency));
        assert!(!is_reachable(c, a, &adjacency));
        assert!(is_reachable(a, a, &adjacency));
    }

    #[test]
    fn reachability_handles_diamonds() {
        let (a, b, c, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        adjacency.insert(a, vec![b, c]);
        adjacency.insert(b, vec![d]);
        adjacency.insert(c, vec![d]);

        assert!(is_reachable(a, d, &adjacency));
        assert!(!is_reachable(d, a, &adjacency));
    }
}
