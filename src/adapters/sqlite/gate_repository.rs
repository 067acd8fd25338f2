//! Gate rule, decision, and candidate link persistence.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    EvidenceRef, EvidenceRequirement, GateCandidate, GateClass, GateCondition, GateDecision,
    GateOutcome, GateRule, GateScope,
};

use super::codec::{parse_datetime, parse_uuid};

#[derive(Debug, sqlx::FromRow)]
struct GateRuleRow {
    id: String,
    project_id: String,
    name: String,
    gate_class: String,
    scope: String,
    condition: String,
    required_evidence: String,
    evidence_window_seconds: Option<i64>,
    enabled: i64,
    created_at: String,
}

impl TryFrom<GateRuleRow> for GateRule {
    type Error = CoreError;

    fn try_from(row: GateRuleRow) -> CoreResult<Self> {
        let scope: GateScope = serde_json::from_str(&row.scope)?;
        let condition: GateCondition = serde_json::from_str(&row.condition)?;
        let required_evidence: Vec<EvidenceRequirement> =
            serde_json::from_str(&row.required_evidence)?;
        Ok(GateRule {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            name: row.name,
            gate_class: GateClass::from_str(&row.gate_class).ok_or_else(|| {
                CoreError::Storage(format!("unknown gate class {:?}", row.gate_class))
            })?,
            scope,
            condition,
            required_evidence,
            evidence_window_seconds: row.evidence_window_seconds,
            enabled: row.enabled != 0,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

pub async fn insert_rule(conn: &mut SqliteConnection, rule: &GateRule) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO gate_rules (id, project_id, name, gate_class, scope, condition,
            required_evidence, evidence_window_seconds, enabled, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(rule.id.to_string())
    .bind(rule.project_id.to_string())
    .bind(&rule.name)
    .bind(rule.gate_class.as_str())
    .bind(serde_json::to_string(&rule.scope)?)
    .bind(serde_json::to_string(&rule.condition)?)
    .bind(serde_json::to_string(&rule.required_evidence)?)
    .bind(rule.evidence_window_seconds)
    .bind(i64::from(rule.enabled))
    .bind(rule.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_rule(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<Option<GateRule>> {
    let row: Option<GateRuleRow> = sqlx::query_as("SELECT * FROM gate_rules WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.map(GateRule::try_from).transpose()
}

pub async fn enabled_rules(
    conn: &mut SqliteConnection,
    project_id: Uuid,
) -> CoreResult<Vec<GateRule>> {
    let rows: Vec<GateRuleRow> =
        sqlx::query_as("SELECT * FROM gate_rules WHERE project_id = ? AND enabled = 1 ORDER BY created_at, id")
            .bind(project_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(GateRule::try_from).collect()
}

/// The open checkpoint task synthesized for `rule`, if one exists. A gate is
/// open while its checkpoint task is live and carries no decision yet.
pub async fn open_gate_task_for_rule(
    conn: &mut SqliteConnection,
    rule_id: Uuid,
) -> CoreResult<Option<Uuid>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT t.id FROM tasks t
         JOIN event_log e ON e.entity_id = t.id AND e.event_type = 'gate_opened'
         WHERE json_extract(e.payload, '$.rule_id') = ?
           AND t.state NOT IN ('integrated', 'cancelled', 'abandoned')
           AND NOT EXISTS (SELECT 1 FROM gate_decisions d WHERE d.gate_task_id = t.id)
         LIMIT 1",
    )
    .bind(rule_id.to_string())
    .fetch_optional(conn)
    .await?;
    row.map(|(id,)| parse_uuid(&id)).transpose()
}

/// The rule that synthesized a checkpoint task, read back from its
/// `gate_opened` event.
pub async fn rule_for_gate_task(
    conn: &mut SqliteConnection,
    gate_task_id: Uuid,
) -> CoreResult<Option<Uuid>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT json_extract(payload, '$.rule_id') FROM event_log
         WHERE entity_id = ? AND event_type = 'gate_opened'
         ORDER BY id DESC LIMIT 1",
    )
    .bind(gate_task_id.to_string())
    .fetch_optional(conn)
    .await?;
    row.map(|(id,)| parse_uuid(&id)).transpose()
}

#[derive(Debug, sqlx::FromRow)]
struct GateDecisionRow {
    id: String,
    project_id: String,
    gate_task_id: String,
    rule_id: String,
    outcome: String,
    actor_id: String,
    reason: String,
    evidence_refs: String,
    created_at: String,
}

impl TryFrom<GateDecisionRow> for GateDecision {
    type Error = CoreError;

    fn try_from(row: GateDecisionRow) -> CoreResult<Self> {
        let evidence_refs: Vec<EvidenceRef> = serde_json::from_str(&row.evidence_refs)?;
        Ok(GateDecision {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            gate_task_id: parse_uuid(&row.gate_task_id)?,
            rule_id: parse_uuid(&row.rule_id)?,
            outcome: GateOutcome::from_str(&row.outcome)
                .ok_or_else(|| CoreError::Storage(format!("unknown gate outcome {:?}", row.outcome)))?,
            actor_id: row.actor_id,
            reason: row.reason,
            evidence_refs,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

pub async fn insert_decision(conn: &mut SqliteConnection, decision: &GateDecision) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO gate_decisions (id, project_id, gate_task_id, rule_id, outcome, actor_id,
            reason, evidence_refs, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(decision.id.to_string())
    .bind(decision.project_id.to_string())
    .bind(decision.gate_task_id.to_string())
    .bind(decision.rule_id.to_string())
    .bind(decision.outcome.as_str())
    .bind(&decision.actor_id)
    .bind(&decision.reason)
    .bind(serde_json::to_string(&decision.evidence_refs)?)
    .bind(decision.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// Decisions recorded directly against a checkpoint task, newest first.
pub async fn decisions_for_gate(
    conn: &mut SqliteConnection,
    gate_task_id: Uuid,
) -> CoreResult<Vec<GateDecision>> {
    let rows: Vec<GateDecisionRow> = sqlx::query_as(
        "SELECT * FROM gate_decisions WHERE gate_task_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(gate_task_id.to_string())
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(GateDecision::try_from).collect()
}

/// Decisions covering a candidate task, newest first, through its gate links.
pub async fn decisions_for_candidate(
    conn: &mut SqliteConnection,
    candidate_task_id: Uuid,
) -> CoreResult<Vec<GateDecision>> {
    let rows: Vec<GateDecisionRow> = sqlx::query_as(
        "SELECT d.* FROM gate_decisions d
         JOIN gate_candidates c ON c.gate_task_id = d.gate_task_id
         WHERE c.candidate_task_id = ?
         ORDER BY d.created_at DESC, d.id DESC",
    )
    .bind(candidate_task_id.to_string())
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(GateDecision::try_from).collect()
}

pub async fn insert_candidate(conn: &mut SqliteConnection, link: &GateCandidate) -> CoreResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO gate_candidates (gate_task_id, candidate_task_id, project_id, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(link.gate_task_id.to_string())
    .bind(link.candidate_task_id.to_string())
    .bind(link.project_id.to_string())
    .bind(link.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn candidates_for_gate(
    conn: &mut SqliteConnection,
    gate_task_id: Uuid,
) -> CoreResult<Vec<Uuid>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT candidate_task_id FROM gate_candidates WHERE gate_task_id = ? ORDER BY created_at")
            .bind(gate_task_id.to_string())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(|(id,)| parse_uuid(&id)).collect()
}

/// Open gates whose candidate sets include any of `task_ids`.
pub async fn gates_watching_tasks(
    conn: &mut SqliteConnection,
    task_ids: &[Uuid],
) -> CoreResult<Vec<Uuid>> {
    let mut gates = Vec::new();
    for task_id in task_ids {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT c.gate_task_id FROM gate_candidates c
             JOIN tasks t ON t.id = c.gate_task_id
             WHERE c.candidate_task_id = ?
               AND t.state NOT IN ('integrated', 'cancelled', 'abandoned', 'implemented')",
        )
        .bind(task_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
        for (id,) in rows {
            let gate = parse_uuid(&id)?;
            if !gates.contains(&gate) {
                gates.push(gate);
            }
        }
    }
    Ok(gates)
}
