//! Lifecycle engine (C3): the task state machine behind every transition.
//!
//! Legality lives in `TaskState::valid_transitions`; this module adds the
//! preconditions and effects: version bumps, changelog rows, event appends,
//! fencing checks, lease bookkeeping, and dependent-readiness refresh. Every
//! operation runs in one transaction and publishes its events after commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::adapters::sqlite::{
    artifact_repository, event_repository, lease_repository, project_repository, task_repository,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    Artifact, Capability, EventDraft, EventEntity, EventType, ExecutionSnapshot,
    IntegrationAttempt, IntegrationOutcome, Lease, LeaseStatus, NewArtifact, Principal, Project,
    Task, TaskState,
};
use crate::domain::ports::Clock;

use super::authorization::require_any;
use super::event_log::EventLog;
use super::gate_engine;
use super::scheduler;

/// Actor/reason/correlation context threaded through a transition.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TransitionCtx<'a> {
    pub actor_id: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub correlation_id: Option<&'a str>,
}

/// Validate and persist a transition: state change, version bump, changelog
/// row, and a `task_transitioned` event, all on the caller's connection.
pub(crate) async fn apply_transition(
    conn: &mut SqliteConnection,
    task: &mut Task,
    target: TaskState,
    now: DateTime<Utc>,
    ctx: TransitionCtx<'_>,
    outbox: &mut Vec<crate::domain::models::EventRecord>,
) -> CoreResult<()> {
    let from = task.state;
    task.transition_to(target, now)?;
    task_repository::update(conn, task).await?;
    event_repository::insert_changelog(
        conn,
        task.id,
        task.project_id,
        from.as_str(),
        target.as_str(),
        ctx.actor_id,
        ctx.reason,
        &now.to_rfc3339(),
    )
    .await?;
    let record = event_repository::append(
        conn,
        &EventDraft::new(
            task.project_id,
            EventEntity::Task,
            task.id,
            EventType::TaskTransitioned,
            json!({
                "short_id": task.short_id,
                "from": from.as_str(),
                "to": target.as_str(),
                "version": task.version,
                "actor_id": ctx.actor_id,
                "reason": ctx.reason,
            }),
        )
        .with_correlation(ctx.correlation_id.map(str::to_string)),
        &now.to_rfc3339(),
    )
    .await?;
    outbox.push(record);
    Ok(())
}

/// FENCING_STALE unless the lease's counter matches the task's current one.
pub(crate) fn check_fencing(lease: &Lease, task: &Task) -> CoreResult<()> {
    if lease.fencing_counter != task.fencing_counter {
        return Err(CoreError::FencingStale {
            presented: lease.fencing_counter,
            current: task.fencing_counter,
        });
    }
    Ok(())
}

/// Resolve a token to its lease, enforcing active status and expiry.
pub(crate) async fn require_active_lease(
    conn: &mut SqliteConnection,
    token: &str,
    now: DateTime<Utc>,
) -> CoreResult<Lease> {
    let lease = lease_repository::fetch_by_token(conn, token)
        .await?
        .ok_or_else(|| CoreError::LeaseExpired(token.to_string()))?;
    if lease.status != LeaseStatus::Active || lease.is_expired(now) {
        return Err(CoreError::LeaseExpired(token.to_string()));
    }
    Ok(lease)
}

/// PRECONDITION_FAILED unless the project accepts mutations.
pub(crate) fn require_active_project(project: &Project) -> CoreResult<()> {
    if !project.accepts_mutations() {
        return Err(CoreError::PreconditionFailed(format!(
            "project {} is {}",
            project.id,
            project.status.as_str()
        )));
    }
    Ok(())
}

pub struct LifecycleEngine {
    pool: SqlitePool,
    events: EventLog,
    clock: Arc<dyn Clock>,
}

impl LifecycleEngine {
    pub fn new(pool: SqlitePool, events: EventLog, clock: Arc<dyn Clock>) -> Self {
        Self { pool, events, clock }
    }

    /// Claimed -> InProgress. The execution snapshot captured at claim time
    /// must exist; it is returned so the worker executes against it.
    pub async fn start(&self, principal: &Principal, token: &str) -> CoreResult<ExecutionSnapshot> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let lease = require_active_lease(&mut tx, token, now).await?;
        principal.require(Capability::TransitionExecute, Some(lease.project_id))?;
        let project = project_repository::get(&mut tx, lease.project_id).await?;
        require_active_project(&project)?;

        let mut task = task_repository::get(&mut tx, lease.task_id).await?;
        check_fencing(&lease, &task)?;
        let snapshot = lease_repository::snapshot_for_lease(&mut tx, &lease.token)
            .await?
            .ok_or_else(|| {
                CoreError::PreconditionFailed(format!(
                    "no execution snapshot captured for lease on task {}",
                    task.id
                ))
            })?;

        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(&lease.agent_id),
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::InProgress, now, ctx, &mut outbox).await?;
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(snapshot)
    }

    /// Append work evidence under an active lease.
    pub async fn append_artifact(
        &self,
        principal: &Principal,
        token: &str,
        new: NewArtifact,
    ) -> CoreResult<Artifact> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let lease = require_active_lease(&mut tx, token, now).await?;
        principal.require(Capability::TransitionExecute, Some(lease.project_id))?;
        let task = task_repository::get(&mut tx, lease.task_id).await?;
        check_fencing(&lease, &task)?;

        let artifact = Artifact {
            id: Uuid::new_v4(),
            task_id: task.id,
            project_id: task.project_id,
            branch: new.branch,
            commit_sha: new.commit_sha,
            check_status: new.check_status,
            touched_files: new.touched_files,
            created_at: now,
        };
        artifact_repository::insert_artifact(&mut tx, &artifact).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                task.project_id,
                EventEntity::Task,
                task.id,
                EventType::ArtifactAppended,
                json!({
                    "artifact_id": artifact.id,
                    "commit_sha": artifact.commit_sha,
                    "check_status": artifact.check_status.as_str(),
                }),
            ),
            &now.to_rfc3339(),
        )
        .await?;
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(artifact)
    }

    /// InProgress -> Implemented. At least one artifact with passing checks
    /// must exist, unless an admin forces with a reason. The lease is
    /// consumed; dependents waiting on `implemented` unlock.
    pub async fn submit_implemented(
        &self,
        principal: &Principal,
        token: &str,
        artifact: Option<NewArtifact>,
        force_reason: Option<&str>,
        correlation_id: Option<&str>,
    ) -> CoreResult<Task> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let lease = require_active_lease(&mut tx, token, now).await?;
        principal.require(Capability::TransitionExecute, Some(lease.project_id))?;

        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, lease.project_id, corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }

        let mut task = task_repository::get(&mut tx, lease.task_id).await?;
        check_fencing(&lease, &task)?;

        if let Some(new) = artifact {
            let artifact = Artifact {
                id: Uuid::new_v4(),
                task_id: task.id,
                project_id: task.project_id,
                branch: new.branch,
                commit_sha: new.commit_sha,
                check_status: new.check_status,
                touched_files: new.touched_files,
                created_at: now,
            };
            artifact_repository::insert_artifact(&mut tx, &artifact).await?;
        }

        if !artifact_repository::has_passed_artifact(&mut tx, task.id).await? {
            match force_reason {
                Some(reason) if principal.is_admin() && !reason.trim().is_empty() => {
                    info!(task_id = %task.id, reason, "implemented forced without passing checks");
                }
                Some(_) => return Err(CoreError::GateForceRequiresAdmin),
                None => {
                    return Err(CoreError::PreconditionFailed(format!(
                        "task {} has no artifact with passing checks",
                        task.id
                    )))
                }
            }
        }

        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(&lease.agent_id),
            reason: force_reason,
            correlation_id,
        };
        apply_transition(&mut tx, &mut task, TaskState::Implemented, now, ctx, &mut outbox).await?;

        let mut done = lease.clone();
        done.status = LeaseStatus::Consumed;
        done.updated_at = now;
        lease_repository::update_lease(&mut tx, &done).await?;

        scheduler::refresh_dependents(&mut tx, &task, now, &mut outbox).await?;

        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                task.project_id,
                corr,
                "submit_implemented",
                &serde_json::to_value(&task)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(task)
    }

    /// Implemented -> Integrated, behind gate enforcement (C6). Force mode is
    /// admin-only with a reason and leaves a dedicated event.
    pub async fn request_integrate(
        &self,
        principal: &Principal,
        task_id: Uuid,
        force_reason: Option<&str>,
        correlation_id: Option<&str>,
    ) -> CoreResult<Task> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        require_any(
            principal,
            &[Capability::TransitionExecute, Capability::IntegrationReport],
            Some(task.project_id),
        )?;

        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, task.project_id, corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }

        let mut outbox = Vec::new();
        self.integrate(&mut tx, &mut task, principal, force_reason, correlation_id, now, &mut outbox)
            .await?;

        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                task.project_id,
                corr,
                "request_integrate",
                &serde_json::to_value(&task)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(task)
    }

    /// Record a merge outcome. `success` integrates (gate-enforced),
    /// `conflict` moves the task to Conflict, the rest only append the
    /// attempt record.
    pub async fn report_integration_result(
        &self,
        principal: &Principal,
        task_id: Uuid,
        outcome: IntegrationOutcome,
        detail: Option<String>,
        correlation_id: Option<&str>,
    ) -> CoreResult<IntegrationAttempt> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        principal.require(Capability::IntegrationReport, Some(task.project_id))?;

        if let Some(corr) = correlation_id {
            if let Some(v) = event_repository::replayed_outcome(&mut tx, task.project_id, corr).await? {
                return Ok(serde_json::from_value(v)?);
            }
        }

        let attempt = IntegrationAttempt {
            id: Uuid::new_v4(),
            task_id: task.id,
            project_id: task.project_id,
            outcome,
            detail,
            created_at: now,
        };
        artifact_repository::insert_integration_attempt(&mut tx, &attempt).await?;
        let mut outbox = vec![
            event_repository::append(
                &mut tx,
                &EventDraft::new(
                    task.project_id,
                    EventEntity::Task,
                    task.id,
                    EventType::IntegrationAttemptRecorded,
                    json!({ "outcome": outcome.as_str(), "attempt_id": attempt.id }),
                )
                .with_correlation(correlation_id.map(str::to_string)),
                &now.to_rfc3339(),
            )
            .await?,
        ];

        match outcome {
            IntegrationOutcome::Success => {
                self.integrate(&mut tx, &mut task, principal, None, correlation_id, now, &mut outbox)
                    .await?;
            }
            IntegrationOutcome::Conflict => {
                let ctx = TransitionCtx {
                    actor_id: Some(principal.actor_id.as_str()),
                    reason: Some("merge conflict"),
                    correlation_id,
                };
                apply_transition(&mut tx, &mut task, TaskState::Conflict, now, ctx, &mut outbox)
                    .await?;
                scheduler::refresh_dependents(&mut tx, &task, now, &mut outbox).await?;
            }
            IntegrationOutcome::Queued | IntegrationOutcome::FailedChecks => {}
        }

        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                task.project_id,
                corr,
                "report_integration_result",
                &serde_json::to_value(&attempt)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(attempt)
    }

    /// Conflict -> Ready retry.
    pub async fn retry_conflict(&self, principal: &Principal, task_id: Uuid) -> CoreResult<Task> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        require_any(
            principal,
            &[Capability::ScheduleAssign, Capability::IntegrationReport],
            Some(task.project_id),
        )?;

        if task.state != TaskState::Conflict {
            return Err(CoreError::PreconditionFailed(format!(
                "task {} is not in conflict",
                task.id
            )));
        }
        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(principal.actor_id.as_str()),
            reason: Some("conflict retry"),
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::Ready, now, ctx, &mut outbox).await?;
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(task)
    }

    /// Ready/InProgress -> Blocked with an explicit reason.
    pub async fn block(
        &self,
        principal: &Principal,
        task_id: Uuid,
        reason: &str,
    ) -> CoreResult<Task> {
        if reason.trim().is_empty() {
            return Err(CoreError::InvalidArgument("block reason cannot be empty".into()));
        }
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        require_any(
            principal,
            &[Capability::TransitionExecute, Capability::ScheduleAssign],
            Some(task.project_id),
        )?;

        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(principal.actor_id.as_str()),
            reason: Some(reason),
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::Blocked, now, ctx, &mut outbox).await?;
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(task)
    }

    /// Blocked -> Ready, then an immediate readiness check: if the task's
    /// predecessors regressed while it was blocked it drops to Backlog.
    pub async fn unblock(&self, principal: &Principal, task_id: Uuid) -> CoreResult<Task> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        require_any(
            principal,
            &[Capability::TransitionExecute, Capability::ScheduleAssign],
            Some(task.project_id),
        )?;

        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(principal.actor_id.as_str()),
            reason: Some("unblocked"),
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::Ready, now, ctx, &mut outbox).await?;
        scheduler::refresh_readiness(&mut tx, &[task.id], now, &mut outbox).await?;
        let task = task_repository::get(&mut tx, task_id).await?;
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(task)
    }

    /// Backlog/Ready -> Cancelled.
    pub async fn cancel(
        &self,
        principal: &Principal,
        task_id: Uuid,
        reason: Option<&str>,
    ) -> CoreResult<Task> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        require_any(
            principal,
            &[Capability::PlanEdit, Capability::ScheduleAssign],
            Some(task.project_id),
        )?;

        let mut outbox = Vec::new();
        let ctx = TransitionCtx {
            actor_id: Some(principal.actor_id.as_str()),
            reason,
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::Cancelled, now, ctx, &mut outbox).await?;
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(task)
    }

    /// InProgress -> Abandoned. Releases the active lease and bumps the
    /// fencing counter so the dead holder cannot write again.
    pub async fn abandon(
        &self,
        principal: &Principal,
        task_id: Uuid,
        reason: Option<&str>,
    ) -> CoreResult<Task> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id).await?;
        principal.require(Capability::TransitionExecute, Some(task.project_id))?;

        let mut outbox = Vec::new();
        if let Some(lease) = lease_repository::fetch_active_for_task(&mut tx, task.id).await? {
            let mut released = lease;
            released.status = LeaseStatus::Released;
            released.updated_at = now;
            lease_repository::update_lease(&mut tx, &released).await?;
            task.fencing_counter += 1;
            outbox.push(
                event_repository::append(
                    &mut tx,
                    &EventDraft::new(
                        task.project_id,
                        EventEntity::Lease,
                        released.id,
                        EventType::LeaseReleased,
                        json!({ "task_id": task.id, "reason": "abandoned" }),
                    ),
                    &now.to_rfc3339(),
                )
                .await?,
            );
        }

        let ctx = TransitionCtx {
            actor_id: Some(principal.actor_id.as_str()),
            reason,
            ..TransitionCtx::default()
        };
        apply_transition(&mut tx, &mut task, TaskState::Abandoned, now, ctx, &mut outbox).await?;
        tx.commit().await?;
        self.events.publish_all(outbox);
        Ok(task)
    }

    /// Shared Implemented -> Integrated path with gate enforcement.
    #[allow(clippy::too_many_arguments)]
    async fn integrate(
        &self,
        tx: &mut SqliteConnection,
        task: &mut Task,
        principal: &Principal,
        force_reason: Option<&str>,
        correlation_id: Option<&str>,
        now: DateTime<Utc>,
        outbox: &mut Vec<crate::domain::models::EventRecord>,
    ) -> CoreResult<()> {
        if task.state != TaskState::Implemented {
            return Err(CoreError::IllegalTransition {
                from: task.state.as_str().to_string(),
                to: TaskState::Integrated.as_str().to_string(),
            });
        }

        match force_reason {
            Some(reason) => {
                if !principal.is_admin() || reason.trim().is_empty() {
                    return Err(CoreError::GateForceRequiresAdmin);
                }
                outbox.push(
                    event_repository::append(
                        tx,
                        &EventDraft::new(
                            task.project_id,
                            EventEntity::Gate,
                            task.id,
                            EventType::GateForcedIntegration,
                            json!({
                                "task_id": task.id,
                                "actor_id": principal.actor_id,
                                "reason": reason,
                            }),
                        ),
                        &now.to_rfc3339(),
                    )
                    .await?,
                );
            }
            None => {
                gate_engine::ensure_integration_evidence(tx, task, now).await?;
            }
        }

        let ctx = TransitionCtx {
            actor_id: Some(principal.actor_id.as_str()),
            reason: force_reason,
            correlation_id,
        };
        apply_transition(tx, task, TaskState::Integrated, now, ctx, outbox).await?;
        scheduler::refresh_dependents(tx, task, now, outbox).await?;
        Ok(())
    }
}
