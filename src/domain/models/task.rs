//! Task domain model.
//!
//! Tasks are the unit of execution. They form a per-project DAG through
//! dependency edges and move through a state machine with back-edges
//! (Blocked and Conflict both return to Ready), so legality lives in a
//! single transition table rather than state-specific methods.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Defined but not yet schedulable (dependencies unmet).
    Backlog,
    /// All incoming edges satisfied; eligible for pull.
    Ready,
    /// Directed at a specific agent via a hard reservation.
    Reserved,
    /// Exclusively held under an active lease.
    Claimed,
    /// Execution started; an immutable snapshot governs the work.
    InProgress,
    /// Work submitted with passing evidence.
    Implemented,
    /// Merged; terminally done.
    Integrated,
    /// Merge reported a conflict; retryable.
    Conflict,
    /// Explicitly held back with a reason.
    Blocked,
    /// Worker gave up mid-execution.
    Abandoned,
    /// Withdrawn before execution.
    Cancelled,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Backlog
    }
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Implemented => "implemented",
            Self::Integrated => "integrated",
            Self::Conflict => "conflict",
            Self::Blocked => "blocked",
            Self::Abandoned => "abandoned",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "backlog" => Some(Self::Backlog),
            "ready" => Some(Self::Ready),
            "reserved" => Some(Self::Reserved),
            "claimed" => Some(Self::Claimed),
            "in_progress" => Some(Self::InProgress),
            "implemented" => Some(Self::Implemented),
            "integrated" => Some(Self::Integrated),
            "conflict" => Some(Self::Conflict),
            "blocked" => Some(Self::Blocked),
            "abandoned" => Some(Self::Abandoned),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Legal targets from this state.
    pub fn valid_transitions(&self) -> &'static [TaskState] {
        match self {
            Self::Backlog => &[Self::Ready, Self::Cancelled],
            Self::Ready => &[
                Self::Reserved,
                Self::Claimed,
                Self::Blocked,
                Self::Cancelled,
                Self::Backlog, // readiness regression
            ],
            Self::Reserved => &[Self::Claimed, Self::Ready],
            Self::Claimed => &[Self::InProgress, Self::Ready],
            Self::InProgress => &[Self::Implemented, Self::Blocked, Self::Abandoned],
            Self::Implemented => &[Self::Integrated, Self::Conflict],
            Self::Integrated => &[],
            Self::Conflict => &[Self::Ready],
            Self::Blocked => &[Self::Ready],
            Self::Abandoned => &[],
            Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: Self) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Rank in the finality order used by unlock criteria:
    /// Integrated > Implemented > everything else.
    pub fn finality_rank(&self) -> u8 {
        match self {
            Self::Integrated => 2,
            Self::Implemented => 1,
            _ => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Integrated | Self::Abandoned | Self::Cancelled)
    }

    /// States in which an agent actively occupies the task's paths.
    pub fn occupies_paths(&self) -> bool {
        matches!(self, Self::Claimed | Self::InProgress)
    }

    /// States released back to Ready when a hold is invalidated.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Claimed | Self::Reserved)
    }
}

/// Semantic class of work, used by gate scope predicates and ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    Architecture,
    DbSchema,
    Security,
    CrossCutting,
    ReviewGate,
    MergeGate,
    Frontend,
    Backend,
    Crud,
    Other,
}

impl Default for TaskClass {
    fn default() -> Self {
        Self::Other
    }
}

impl TaskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::DbSchema => "db_schema",
            Self::Security => "security",
            Self::CrossCutting => "cross_cutting",
            Self::ReviewGate => "review_gate",
            Self::MergeGate => "merge_gate",
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Crud => "crud",
            Self::Other => "other",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "architecture" => Some(Self::Architecture),
            "db_schema" => Some(Self::DbSchema),
            "security" => Some(Self::Security),
            "cross_cutting" => Some(Self::CrossCutting),
            "review_gate" => Some(Self::ReviewGate),
            "merge_gate" => Some(Self::MergeGate),
            "frontend" => Some(Self::Frontend),
            "backend" => Some(Self::Backend),
            "crud" => Some(Self::Crud),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Checkpoint tasks are synthesized by the gate engine and excluded
    /// from the general pull queue.
    pub fn is_checkpoint(&self) -> bool {
        matches!(self, Self::ReviewGate | Self::MergeGate)
    }

    /// Classes whose implemented backlog counts toward the risk signal.
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self,
            Self::Architecture | Self::DbSchema | Self::Security | Self::CrossCutting
        )
    }
}

/// Execution payload handed to workers via the claim snapshot.
///
/// The `extras` map is open: adapters may carry variant-specific fields
/// without schema changes here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkSpec {
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub path_hints: Vec<String>,
    #[serde(default, flatten)]
    pub extras: HashMap<String, serde_json::Value>,
}

/// A unit of execution in the project DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub phase_id: Option<Uuid>,
    pub milestone_id: Option<Uuid>,
    /// Human-readable id, unique within the project (`P1.M2.T3`).
    pub short_id: String,
    /// Insertion order within (project, milestone).
    pub sequence: i64,
    pub title: String,
    pub description: String,
    /// Lower is more urgent.
    pub priority: i32,
    pub task_class: TaskClass,
    pub capability_tags: Vec<String>,
    pub expected_touches: Vec<String>,
    pub exclusive_paths: Vec<String>,
    pub shared_paths: Vec<String>,
    pub work_spec: WorkSpec,
    pub state: TaskState,
    /// Bumped on every transition; optimistic concurrency anchor.
    pub version: i64,
    /// Monotonic anti-replay counter; mutations presenting a lease must
    /// match it exactly.
    pub fencing_counter: i64,
    /// Agent holding the current or most recent lease.
    pub claimed_by: Option<String>,
    /// When the task last entered Ready; drives the aging rank component.
    pub ready_at: Option<DateTime<Utc>>,
    pub introduced_in_plan_version: i64,
    pub deprecated_in_plan_version: Option<i64>,
    /// Highest plan version whose applied change set materially touched
    /// this task. Heartbeats compare `seen_plan_version` against this, so
    /// priority-only replans never invalidate a hold.
    pub last_material_plan_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(project_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            phase_id: None,
            milestone_id: None,
            short_id: String::new(),
            sequence: 0,
            title: title.into(),
            description: String::new(),
            priority: 100,
            task_class: TaskClass::default(),
            capability_tags: Vec::new(),
            expected_touches: Vec::new(),
            exclusive_paths: Vec::new(),
            shared_paths: Vec::new(),
            work_spec: WorkSpec::default(),
            state: TaskState::default(),
            version: 1,
            fencing_counter: 0,
            claimed_by: None,
            ready_at: None,
            introduced_in_plan_version: 0,
            deprecated_in_plan_version: None,
            last_material_plan_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_class(mut self, class: TaskClass) -> Self {
        self.task_class = class;
        self
    }

    pub fn with_capabilities(mut self, tags: Vec<String>) -> Self {
        self.capability_tags = tags;
        self
    }

    pub fn with_work_spec(mut self, spec: WorkSpec) -> Self {
        self.work_spec = spec;
        self
    }

    pub fn with_milestone(mut self, phase_id: Uuid, milestone_id: Uuid) -> Self {
        self.phase_id = Some(phase_id);
        self.milestone_id = Some(milestone_id);
        self
    }

    pub fn can_transition_to(&self, target: TaskState) -> bool {
        self.state.can_transition_to(target)
    }

    /// Move to `target`, bumping version and timestamps. Callers persist the
    /// result and record the changelog row in the same transaction.
    pub fn transition_to(&mut self, target: TaskState, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.can_transition_to(target) {
            return Err(CoreError::IllegalTransition {
                from: self.state.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        self.state = target;
        self.version += 1;
        self.updated_at = now;
        match target {
            TaskState::Ready => self.ready_at = Some(now),
            TaskState::Backlog => self.ready_at = None,
            _ => {}
        }
        Ok(())
    }

    /// Whether the agent's declared capabilities cover this task.
    pub fn capabilities_match(&self, agent_capabilities: &[String]) -> bool {
        self.capability_tags
            .iter()
            .all(|tag| agent_capabilities.iter().any(|c| c == tag))
    }

    /// Whether any exclusive path overlaps another task's claimed paths.
    pub fn paths_overlap(&self, other_paths: &[String]) -> bool {
        self.exclusive_paths
            .iter()
            .any(|p| other_paths.iter().any(|q| p == q))
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.title.trim().is_empty() {
            return Err(CoreError::InvalidArgument("task title cannot be empty".into()));
        }
        Ok(())
    }
}
