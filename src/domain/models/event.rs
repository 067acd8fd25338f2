//! Event log entries: the append-only audit spine of the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity kind an event refers to, for projection filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventEntity {
    Project,
    Phase,
    Milestone,
    Task,
    Edge,
    Lease,
    Reservation,
    ChangeSet,
    Gate,
    ApiKey,
}

impl EventEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Phase => "phase",
            Self::Milestone => "milestone",
            Self::Task => "task",
            Self::Edge => "edge",
            Self::Lease => "lease",
            Self::Reservation => "reservation",
            Self::ChangeSet => "change_set",
            Self::Gate => "gate",
            Self::ApiKey => "api_key",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "phase" => Some(Self::Phase),
            "milestone" => Some(Self::Milestone),
            "task" => Some(Self::Task),
            "edge" => Some(Self::Edge),
            "lease" => Some(Self::Lease),
            "reservation" => Some(Self::Reservation),
            "change_set" => Some(Self::ChangeSet),
            "gate" => Some(Self::Gate),
            "api_key" => Some(Self::ApiKey),
            _ => None,
        }
    }
}

/// Typed catalog of event names. The log stores the string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ProjectCreated,
    PhaseCreated,
    MilestoneCreated,
    TaskCreated,
    TaskUpdated,
    TaskTransitioned,
    TaskRemoved,
    EdgeAdded,
    EdgeRemoved,
    LeaseGranted,
    LeaseReleased,
    LeaseExpired,
    ReservationCreated,
    ReservationReleased,
    ReservationExpired,
    ReservationConsumed,
    SnapshotCaptured,
    ArtifactAppended,
    IntegrationAttemptRecorded,
    ChangeSetSubmitted,
    ChangeSetValidated,
    ChangeSetRejected,
    ChangeSetApplied,
    PlanOperationApplied,
    ReplanBarrierSet,
    HoldReleasedByReplan,
    GateRuleCreated,
    GateOpened,
    GateDecisionRecorded,
    GateForcedIntegration,
    GateRiskSummary,
    ApiKeyCreated,
    ApiKeyRevoked,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated => "project_created",
            Self::PhaseCreated => "phase_created",
            Self::MilestoneCreated => "milestone_created",
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskTransitioned => "task_transitioned",
            Self::TaskRemoved => "task_removed",
            Self::EdgeAdded => "edge_added",
            Self::EdgeRemoved => "edge_removed",
            Self::LeaseGranted => "lease_granted",
            Self::LeaseReleased => "lease_released",
            Self::LeaseExpired => "lease_expired",
            Self::ReservationCreated => "reservation_created",
            Self::ReservationReleased => "reservation_released",
            Self::ReservationExpired => "reservation_expired",
            Self::ReservationConsumed => "reservation_consumed",
            Self::SnapshotCaptured => "snapshot_captured",
            Self::ArtifactAppended => "artifact_appended",
            Self::IntegrationAttemptRecorded => "integration_attempt_recorded",
            Self::ChangeSetSubmitted => "change_set_submitted",
            Self::ChangeSetValidated => "change_set_validated",
            Self::ChangeSetRejected => "change_set_rejected",
            Self::ChangeSetApplied => "change_set_applied",
            Self::PlanOperationApplied => "plan_operation_applied",
            Self::ReplanBarrierSet => "replan_barrier_set",
            Self::HoldReleasedByReplan => "hold_released_by_replan",
            Self::GateRuleCreated => "gate_rule_created",
            Self::GateOpened => "gate_opened",
            Self::GateDecisionRecorded => "gate_decision_recorded",
            Self::GateForcedIntegration => "gate_forced_integration",
            Self::GateRiskSummary => "gate_risk_summary",
            Self::ApiKeyCreated => "api_key_created",
            Self::ApiKeyRevoked => "api_key_revoked",
        }
    }
}

/// A committed log entry. `id` is monotonic per store and reflects commit
/// order within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub project_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An event to be appended inside the current transaction.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub project_id: Uuid,
    pub entity_type: EventEntity,
    pub entity_id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
}

impl EventDraft {
    pub fn new(
        project_id: Uuid,
        entity_type: EventEntity,
        entity_id: impl ToString,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            project_id,
            entity_type,
            entity_id: entity_id.to_string(),
            event_type,
            payload,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}
