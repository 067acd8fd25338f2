//! Gate policy: rules, synthesized checkpoints, decisions, and evidence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskClass;

/// Checkpoint flavor a rule synthesizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateClass {
    ReviewGate,
    MergeGate,
}

impl GateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReviewGate => "review_gate",
            Self::MergeGate => "merge_gate",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "review_gate" => Some(Self::ReviewGate),
            "merge_gate" => Some(Self::MergeGate),
            _ => None,
        }
    }

    pub fn task_class(&self) -> TaskClass {
        match self {
            Self::ReviewGate => TaskClass::ReviewGate,
            Self::MergeGate => TaskClass::MergeGate,
        }
    }
}

/// Which tasks a rule watches. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_classes: Vec<TaskClass>,
}

impl GateScope {
    pub fn matches(
        &self,
        phase_id: Option<Uuid>,
        milestone_id: Option<Uuid>,
        class: TaskClass,
    ) -> bool {
        if let Some(p) = self.phase_id {
            if phase_id != Some(p) {
                return false;
            }
        }
        if let Some(m) = self.milestone_id {
            if milestone_id != Some(m) {
                return false;
            }
        }
        if !self.task_classes.is_empty() && !self.task_classes.contains(&class) {
            return false;
        }
        true
    }
}

/// When a rule fires for its scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateCondition {
    /// Every task of the milestone has reached Implemented or beyond.
    MilestoneComplete { milestone_id: Uuid },
    /// At least `threshold` in-scope tasks sit in Implemented awaiting review.
    ImplementedBacklog { threshold: u32 },
    /// At least `threshold` in-scope *high-risk* tasks sit in Implemented.
    RiskThreshold { threshold: u32 },
    /// Some in-scope task has been Implemented for longer than this.
    ImplementedAge { max_age_seconds: i64 },
}

impl GateCondition {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MilestoneComplete { .. } => "milestone_complete",
            Self::ImplementedBacklog { .. } => "implemented_backlog",
            Self::RiskThreshold { .. } => "risk_threshold",
            Self::ImplementedAge { .. } => "implemented_age",
        }
    }
}

/// One item of a rule's `required_evidence` schema: a decision must carry a
/// reference of every required kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRequirement {
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A reference attached to a gate decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub kind: String,
    pub reference: String,
    #[serde(default, flatten)]
    pub extras: HashMap<String, serde_json::Value>,
}

/// Whether `refs` satisfies every requirement: for each required kind there
/// is a reference of that kind with a non-empty value.
pub fn evidence_satisfies(required: &[EvidenceRequirement], refs: &[EvidenceRef]) -> bool {
    required.iter().all(|req| {
        refs.iter()
            .any(|r| r.kind == req.kind && !r.reference.trim().is_empty())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRule {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub gate_class: GateClass,
    pub scope: GateScope,
    pub condition: GateCondition,
    pub required_evidence: Vec<EvidenceRequirement>,
    /// How long an approving decision stays valid for integrate enforcement.
    /// `None` means no window: any prior approving decision counts.
    pub evidence_window_seconds: Option<i64>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Approved,
    Rejected,
    ApprovedWithRisk,
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ApprovedWithRisk => "approved_with_risk",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "approved_with_risk" => Some(Self::ApprovedWithRisk),
            _ => None,
        }
    }

    pub fn is_approving(&self) -> bool {
        matches!(self, Self::Approved | Self::ApprovedWithRisk)
    }
}

/// Outcome record for a checkpoint task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub id: Uuid,
    pub project_id: Uuid,
    pub gate_task_id: Uuid,
    pub rule_id: Uuid,
    pub outcome: GateOutcome,
    pub actor_id: String,
    pub reason: String,
    pub evidence_refs: Vec<EvidenceRef>,
    pub created_at: DateTime<Utc>,
}

/// Link binding a synthesized checkpoint task to one candidate task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCandidate {
    pub gate_task_id: Uuid,
    pub candidate_task_id: Uuid,
    pub project_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// SLA posture of an open checkpoint, derived from its age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaState {
    OnTrack,
    AtRisk,
    Breached,
}

impl SlaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTrack => "on_track",
            Self::AtRisk => "at_risk",
            Self::Breached => "breached",
        }
    }
}

/// Read-only listing row for the checkpoint view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointView {
    pub gate_task_id: Uuid,
    pub short_id: String,
    pub gate_class: GateClass,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub opened_at: DateTime<Utc>,
    pub age_seconds: i64,
    pub sla_state: SlaState,
    pub ready_candidates: u32,
    pub blocked_candidates: u32,
    pub total_candidates: u32,
    pub phase_id: Option<Uuid>,
    pub milestone_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(kind: &str) -> EvidenceRequirement {
        EvidenceRequirement { kind: kind.into(), description: None }
    }

    fn evref(kind: &str, reference: &str) -> EvidenceRef {
        EvidenceRef {
            kind: kind.into(),
            reference: reference.into(),
            extras: HashMap::new(),
        }
    }

    #[test]
    fn evidence_must_cover_every_required_kind() {
        let required = vec![req("commit"), req("check_run")];
        assert!(evidence_satisfies(
            &required,
            &[evref("commit", "abc123"), evref("check_run", "ci/42")]
        ));
        assert!(!evidence_satisfies(&required, &[evref("commit", "abc123")]));
        // blank references do not count
        assert!(!evidence_satisfies(
            &required,
            &[evref("commit", "abc123"), evref("check_run", "  ")]
        ));
        // no requirements: anything passes
        assert!(evidence_satisfies(&[], &[]));
    }

    #[test]
    fn scope_matching() {
        let milestone = Uuid::new_v4();
        let scope = GateScope {
            milestone_id: Some(milestone),
            task_classes: vec![TaskClass::Security, TaskClass::DbSchema],
            ..GateScope::default()
        };
        assert!(scope.matches(None, Some(milestone), TaskClass::Security));
        assert!(!scope.matches(None, Some(milestone), TaskClass::Frontend));
        assert!(!scope.matches(None, Some(Uuid::new_v4()), TaskClass::Security));

        let open = GateScope::default();
        assert!(open.matches(None, None, TaskClass::Other));
    }

    #[test]
    fn approving_outcomes() {
        assert!(GateOutcome::Approved.is_approving());
        assert!(GateOutcome::ApprovedWithRisk.is_approving());
        assert!(!GateOutcome::Rejected.is_approving());
    }
}
