//! Gate engine (C6): policy-triggered checkpoint synthesis, review decision
//! records, and evidence enforcement at the integrate boundary.
//!
//! Rules are evaluated on task state-change events and on a periodic tick; a
//! rule with an already-open gate (a checkpoint task without a decision)
//! never opens a second one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::adapters::sqlite::{
    event_repository, gate_repository, hierarchy_repository, project_repository, task_repository,
    TaskFilter,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    evidence_satisfies, task_short_id, Capability, CheckpointView, EventDraft, EventEntity,
    EventRecord, EventType, EvidenceRef, EvidenceRequirement, GateCandidate, GateClass,
    GateCondition, GateDecision, GateOutcome, GateRule, GateScope, Principal, SlaState, Task,
    TaskState,
};
use crate::domain::ports::Clock;

use super::event_log::EventLog;

/// Caller-supplied fields for a new rule.
#[derive(Debug, Clone)]
pub struct NewGateRule {
    pub name: String,
    pub gate_class: GateClass,
    pub scope: GateScope,
    pub condition: GateCondition,
    pub required_evidence: Vec<EvidenceRequirement>,
    pub evidence_window_seconds: Option<i64>,
}

/// Caller-supplied fields for a decision.
#[derive(Debug, Clone)]
pub struct NewGateDecision {
    pub outcome: GateOutcome,
    pub reason: String,
    pub evidence_refs: Vec<EvidenceRef>,
}

pub struct GateEngine {
    pool: SqlitePool,
    events: EventLog,
    clock: Arc<dyn Clock>,
}

impl GateEngine {
    pub fn new(pool: SqlitePool, events: EventLog, clock: Arc<dyn Clock>) -> Self {
        Self { pool, events, clock }
    }

    pub async fn create_rule(
        &self,
        principal: &Principal,
        project_id: Uuid,
        new: NewGateRule,
    ) -> CoreResult<GateRule> {
        principal.require(Capability::GateRuleEdit, Some(project_id))?;
        if new.name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("gate rule name cannot be empty".into()));
        }
        let now = self.clock.now();
        let rule = GateRule {
            id: Uuid::new_v4(),
            project_id,
            name: new.name,
            gate_class: new.gate_class,
            scope: new.scope,
            condition: new.condition,
            required_evidence: new.required_evidence,
            evidence_window_seconds: new.evidence_window_seconds,
            enabled: true,
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;
        project_repository::get(&mut tx, project_id).await?;
        gate_repository::insert_rule(&mut tx, &rule).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                project_id,
                EventEntity::Gate,
                rule.id,
                EventType::GateRuleCreated,
                json!({ "name": rule.name, "condition": rule.condition.kind() }),
            ),
            &now.to_rfc3339(),
        )
        .await?;
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(rule)
    }

    /// Evaluate every enabled rule for the project, synthesizing checkpoint
    /// tasks where conditions fire. Returns the checkpoints opened. Called
    /// by the sweeper on task events and on its tick; errors are logged by
    /// the caller, never surfaced to agents.
    pub async fn evaluate_project(&self, project_id: Uuid) -> CoreResult<Vec<Task>> {
        let now = self.clock.now();
        let mut opened = Vec::new();

        let rules = {
            let mut conn = self.pool.acquire().await?;
            gate_repository::enabled_rules(&mut conn, project_id).await?
        };

        for rule in rules {
            let mut tx = self.pool.begin().await?;
            if gate_repository::open_gate_task_for_rule(&mut tx, rule.id)
                .await?
                .is_some()
            {
                continue;
            }
            let candidates = candidates_in_scope(&mut tx, &rule, project_id).await?;
            if !condition_fires(&rule.condition, &candidates, &mut tx, now).await? {
                continue;
            }
            let candidate_ids: Vec<Uuid> = candidates.iter().map(|t| t.id).collect();
            if candidate_ids.is_empty() {
                continue;
            }

            let mut outbox = Vec::new();
            let checkpoint = synthesize_checkpoint(
                &mut tx,
                &rule,
                project_id,
                &candidate_ids,
                now,
                &mut outbox,
            )
            .await?;
            tx.commit().await?;
            self.events.publish_all(outbox);
            opened.push(checkpoint);
        }
        Ok(opened)
    }

    /// Record a reviewer decision for an open checkpoint.
    pub async fn record_decision(
        &self,
        principal: &Principal,
        gate_task_id: Uuid,
        new: NewGateDecision,
        correlation_id: Option<&str>,
    ) -> CoreResult<GateDecision> {
        if new.reason.trim().is_empty() {
            return Err(CoreError::InvalidArgument("decision reason cannot be empty".into()));
        }
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        // Resolve the gate task to its project before scope enforcement.
        let gate_task = task_repository::get(&mut tx, gate_task_id).await?;
        principal.require(Capability::GateDecide, Some(gate_task.project_id))?;
        if !gate_task.task_class.is_checkpoint() {
            return Err(CoreError::InvalidArgument(format!(
                "task {gate_task_id} is not a checkpoint task"
            )));
        }

        if let Some(corr) = correlation_id {
            if let Some(v) =
                event_repository::replayed_outcome(&mut tx, gate_task.project_id, corr).await?
            {
                return Ok(serde_json::from_value(v)?);
            }
        }

        let rule_id = gate_repository::rule_for_gate_task(&mut tx, gate_task_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidArgument(format!(
                    "checkpoint {gate_task_id} has no originating rule"
                ))
            })?;
        let rule = gate_repository::fetch_rule(&mut tx, rule_id)
            .await?
            .ok_or_else(|| CoreError::InvalidArgument(format!("gate rule {rule_id} not found")))?;

        if new.outcome.is_approving() && !evidence_satisfies(&rule.required_evidence, &new.evidence_refs)
        {
            return Err(CoreError::GateEvidenceRequired(gate_task_id));
        }

        let decision = GateDecision {
            id: Uuid::new_v4(),
            project_id: gate_task.project_id,
            gate_task_id,
            rule_id,
            outcome: new.outcome,
            actor_id: principal.actor_id.clone(),
            reason: new.reason,
            evidence_refs: new.evidence_refs,
            created_at: now,
        };
        gate_repository::insert_decision(&mut tx, &decision).await?;
        let record = event_repository::append(
            &mut tx,
            &EventDraft::new(
                gate_task.project_id,
                EventEntity::Gate,
                gate_task_id,
                EventType::GateDecisionRecorded,
                json!({
                    "decision_id": decision.id,
                    "outcome": decision.outcome.as_str(),
                    "actor_id": decision.actor_id,
                }),
            )
            .with_correlation(correlation_id.map(str::to_string)),
            &now.to_rfc3339(),
        )
        .await?;

        if let Some(corr) = correlation_id {
            event_repository::record_outcome(
                &mut tx,
                gate_task.project_id,
                corr,
                "record_decision",
                &serde_json::to_value(&decision)?,
                &now.to_rfc3339(),
            )
            .await?;
        }
        tx.commit().await?;
        self.events.publish_all(vec![record]);
        Ok(decision)
    }

    /// Read-only listing of open gates with age, SLA posture, and candidate
    /// risk summary.
    pub async fn list_checkpoints(
        &self,
        principal: &Principal,
        project_id: Uuid,
    ) -> CoreResult<Vec<CheckpointView>> {
        principal.require(Capability::ProjectRead, Some(project_id))?;
        let now = self.clock.now();
        let mut conn = self.pool.acquire().await?;

        let mut views = Vec::new();
        for class in [
            crate::domain::models::TaskClass::ReviewGate,
            crate::domain::models::TaskClass::MergeGate,
        ] {
            let filter = TaskFilter { task_class: Some(class), ..TaskFilter::default() };
            for task in task_repository::list(&mut conn, project_id, &filter).await? {
                if task.state.is_terminal() {
                    continue;
                }
                let Some(rule_id) = gate_repository::rule_for_gate_task(&mut conn, task.id).await?
                else {
                    continue;
                };
                // A decided gate is closed even if the task row lingers.
                if !gate_repository::decisions_for_gate(&mut conn, task.id).await?.is_empty() {
                    continue;
                }
                let rule = gate_repository::fetch_rule(&mut conn, rule_id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::InvalidArgument(format!("gate rule {rule_id} not found"))
                    })?;

                let candidates = gate_repository::candidates_for_gate(&mut conn, task.id).await?;
                let mut ready = 0u32;
                let mut blocked = 0u32;
                for candidate in &candidates {
                    if let Some(c) = task_repository::fetch(&mut conn, *candidate).await? {
                        match c.state {
                            TaskState::Ready => ready += 1,
                            TaskState::Blocked | TaskState::Backlog => blocked += 1,
                            _ => {}
                        }
                    }
                }

                let age_seconds = (now - task.created_at).num_seconds().max(0);
                let sla_state = sla_for(age_seconds, rule.evidence_window_seconds);
                views.push(CheckpointView {
                    gate_task_id: task.id,
                    short_id: task.short_id.clone(),
                    gate_class: rule.gate_class,
                    rule_id,
                    rule_name: rule.name.clone(),
                    opened_at: task.created_at,
                    age_seconds,
                    sla_state,
                    ready_candidates: ready,
                    blocked_candidates: blocked,
                    total_candidates: candidates.len() as u32,
                    phase_id: task.phase_id,
                    milestone_id: task.milestone_id,
                });
            }
        }
        views.sort_by(|a, b| b.age_seconds.cmp(&a.age_seconds));
        Ok(views)
    }
}

fn sla_for(age_seconds: i64, window_seconds: Option<i64>) -> SlaState {
    match window_seconds {
        None => SlaState::OnTrack,
        Some(window) if age_seconds > window => SlaState::Breached,
        Some(window) if age_seconds * 2 > window => SlaState::AtRisk,
        Some(_) => SlaState::OnTrack,
    }
}

/// In-scope candidates a rule watches: tasks sitting in Implemented whose
/// phase/milestone/class match the scope predicate. Checkpoint tasks are
/// never candidates themselves.
async fn candidates_in_scope(
    conn: &mut SqliteConnection,
    rule: &GateRule,
    project_id: Uuid,
) -> CoreResult<Vec<Task>> {
    let implemented =
        task_repository::list_by_state(conn, project_id, TaskState::Implemented).await?;
    Ok(implemented
        .into_iter()
        .filter(|t| !t.task_class.is_checkpoint())
        .filter(|t| rule.scope.matches(t.phase_id, t.milestone_id, t.task_class))
        .collect())
}

async fn condition_fires(
    condition: &GateCondition,
    candidates: &[Task],
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> CoreResult<bool> {
    match condition {
        GateCondition::MilestoneComplete { milestone_id } => {
            let filter = TaskFilter { milestone_id: Some(*milestone_id), ..TaskFilter::default() };
            let project_id = match candidates.first() {
                Some(t) => t.project_id,
                None => return Ok(false),
            };
            let milestone_tasks = task_repository::list(conn, project_id, &filter).await?;
            let live: Vec<&Task> = milestone_tasks
                .iter()
                .filter(|t| t.state != TaskState::Cancelled && !t.task_class.is_checkpoint())
                .collect();
            Ok(!live.is_empty() && live.iter().all(|t| t.state.finality_rank() >= 1))
        }
        GateCondition::ImplementedBacklog { threshold } => {
            Ok(candidates.len() as u32 >= *threshold)
        }
        GateCondition::RiskThreshold { threshold } => {
            let risky = candidates.iter().filter(|t| t.task_class.is_high_risk()).count();
            Ok(risky as u32 >= *threshold)
        }
        GateCondition::ImplementedAge { max_age_seconds } => Ok(candidates
            .iter()
            .any(|t| (now - t.updated_at).num_seconds() >= *max_age_seconds)),
    }
}

/// Create the checkpoint task, link its candidates, and mark it Ready so it
/// can be reserved to a reviewer. Checkpoint classes never enter the general
/// pull queue.
async fn synthesize_checkpoint(
    conn: &mut SqliteConnection,
    rule: &GateRule,
    project_id: Uuid,
    candidate_ids: &[Uuid],
    now: DateTime<Utc>,
    outbox: &mut Vec<EventRecord>,
) -> CoreResult<Task> {
    let milestone = match rule.scope.milestone_id {
        Some(id) => hierarchy_repository::fetch_milestone(conn, id).await?,
        None => None,
    };
    let sequence =
        task_repository::next_task_sequence(conn, project_id, milestone.as_ref().map(|m| m.id))
            .await?;

    let mut task = Task::new(project_id, format!("{}: {}", rule.gate_class.as_str(), rule.name));
    task.description = format!(
        "Checkpoint covering {} candidate task(s) under rule '{}'.",
        candidate_ids.len(),
        rule.name
    );
    task.task_class = rule.gate_class.task_class();
    task.priority = 0;
    task.milestone_id = milestone.as_ref().map(|m| m.id);
    task.phase_id = milestone.as_ref().map(|m| m.phase_id).or(rule.scope.phase_id);
    task.sequence = sequence;
    task.short_id = task_short_id(milestone.as_ref().map(|m| m.short_id.as_str()), sequence);
    task.state = TaskState::Ready;
    task.ready_at = Some(now);
    task.created_at = now;
    task.updated_at = now;
    task_repository::insert(conn, &task).await?;

    for candidate in candidate_ids {
        gate_repository::insert_candidate(
            conn,
            &GateCandidate {
                gate_task_id: task.id,
                candidate_task_id: *candidate,
                project_id,
                created_at: now,
            },
        )
        .await?;
    }

    outbox.push(
        event_repository::append(
            conn,
            &EventDraft::new(
                project_id,
                EventEntity::Task,
                task.id,
                EventType::GateOpened,
                json!({
                    "rule_id": rule.id,
                    "gate_class": rule.gate_class.as_str(),
                    "short_id": task.short_id,
                    "candidates": candidate_ids,
                }),
            ),
            &now.to_rfc3339(),
        )
        .await?,
    );
    Ok(task)
}

/// Integrate-boundary enforcement, shared with the lifecycle engine: some
/// applicable rule must have an approving decision covering this task, from
/// an actor other than the claimant, with satisfying evidence, inside the
/// rule's window. Tasks no applicable rule watches integrate freely.
pub(crate) async fn ensure_integration_evidence(
    conn: &mut SqliteConnection,
    task: &Task,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    let rules = gate_repository::enabled_rules(conn, task.project_id).await?;
    let applicable: Vec<&GateRule> = rules
        .iter()
        .filter(|r| r.scope.matches(task.phase_id, task.milestone_id, task.task_class))
        .collect();
    if applicable.is_empty() {
        return Ok(());
    }

    let decisions = gate_repository::decisions_for_candidate(conn, task.id).await?;
    let mut saw_self_review = None;

    for decision in &decisions {
        if !decision.outcome.is_approving() {
            continue;
        }
        let Some(rule) = applicable.iter().find(|r| r.id == decision.rule_id) else {
            continue;
        };
        if let Some(window) = rule.evidence_window_seconds {
            if decision.created_at < now - Duration::seconds(window) {
                continue;
            }
        }
        if Some(decision.actor_id.as_str()) == task.claimed_by.as_deref() {
            saw_self_review = Some(decision.actor_id.clone());
            continue;
        }
        if !evidence_satisfies(&rule.required_evidence, &decision.evidence_refs) {
            continue;
        }
        return Ok(());
    }

    match saw_self_review {
        Some(actor) => Err(CoreError::GateSelfReview(actor)),
        None => Err(CoreError::GateEvidenceRequired(task.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sla_posture_from_age_and_window() {
        assert_eq!(sla_for(100, None), SlaState::OnTrack);
        assert_eq!(sla_for(100, Some(3600)), SlaState::OnTrack);
        assert_eq!(sla_for(2000, Some(3600)), SlaState::AtRisk);
        assert_eq!(sla_for(3601, Some(3600)), SlaState::Breached);
    }
}
