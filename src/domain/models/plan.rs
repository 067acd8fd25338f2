//! Plan change sets: versioned batches of DAG mutations.
//!
//! Operations are tagged variants so transports can round-trip them as JSON.
//! Classification of a change as *material* (hold-invalidating) lives here so
//! the replan engine and its tests share one definition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::edge::UnlockOn;
use super::task::{Task, TaskClass, WorkSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    Draft,
    Validated,
    Applied,
    Rejected,
}

impl ChangeSetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Validated => "validated",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "validated" => Some(Self::Validated),
            "applied" => Some(Self::Applied),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Fields of a new task introduced by a change set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTaskSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phase_id: Option<Uuid>,
    #[serde(default)]
    pub milestone_id: Option<Uuid>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub task_class: TaskClass,
    #[serde(default)]
    pub capability_tags: Vec<String>,
    #[serde(default)]
    pub expected_touches: Vec<String>,
    #[serde(default)]
    pub exclusive_paths: Vec<String>,
    #[serde(default)]
    pub shared_paths: Vec<String>,
    #[serde(default)]
    pub work_spec: WorkSpec,
}

fn default_priority() -> i32 {
    100
}

/// Partial update of task fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_class: Option<TaskClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_touches: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_spec: Option<WorkSpec>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Whether applying these changes to `task` alters execution semantics.
    /// Title and description edits alone are cosmetic.
    pub fn is_material_for(&self, task: &Task) -> bool {
        if let Some(spec) = &self.work_spec {
            if spec != &task.work_spec {
                return true;
            }
        }
        if let Some(class) = self.task_class {
            if class != task.task_class {
                return true;
            }
        }
        if let Some(tags) = &self.capability_tags {
            if tags != &task.capability_tags {
                return true;
            }
        }
        if let Some(paths) = &self.exclusive_paths {
            if paths != &task.exclusive_paths {
                return true;
            }
        }
        if let Some(paths) = &self.shared_paths {
            if paths != &task.shared_paths {
                return true;
            }
        }
        false
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(v) = &self.title {
            task.title = v.clone();
        }
        if let Some(v) = &self.description {
            task.description = v.clone();
        }
        if let Some(v) = self.task_class {
            task.task_class = v;
        }
        if let Some(v) = &self.capability_tags {
            task.capability_tags = v.clone();
        }
        if let Some(v) = &self.expected_touches {
            task.expected_touches = v.clone();
        }
        if let Some(v) = &self.exclusive_paths {
            task.exclusive_paths = v.clone();
        }
        if let Some(v) = &self.shared_paths {
            task.shared_paths = v.clone();
        }
        if let Some(v) = &self.work_spec {
            task.work_spec = v.clone();
        }
    }
}

/// One mutation inside a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanOperation {
    AddTask {
        spec: NewTaskSpec,
    },
    RemoveTask {
        task_id: Uuid,
    },
    UpdateTask {
        task_id: Uuid,
        changes: TaskChanges,
    },
    AddEdge {
        from_task_id: Uuid,
        to_task_id: Uuid,
        #[serde(default)]
        unlock_on: UnlockOn,
    },
    RemoveEdge {
        from_task_id: Uuid,
        to_task_id: Uuid,
    },
    Reprioritize {
        task_id: Uuid,
        priority: i32,
    },
    /// Park a Backlog/Ready task behind an explicit block until a later
    /// change set (or an unblock) revives it.
    Postpone {
        task_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Retire the task from the plan; cancels it if still unstarted.
    Deprecate {
        task_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl PlanOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddTask { .. } => "add_task",
            Self::RemoveTask { .. } => "remove_task",
            Self::UpdateTask { .. } => "update_task",
            Self::AddEdge { .. } => "add_edge",
            Self::RemoveEdge { .. } => "remove_edge",
            Self::Reprioritize { .. } => "reprioritize",
            Self::Postpone { .. } => "postpone",
            Self::Deprecate { .. } => "deprecate",
        }
    }

    /// The existing task this operation targets, if any.
    pub fn target_task(&self) -> Option<Uuid> {
        match self {
            Self::AddTask { .. } => None,
            Self::RemoveTask { task_id }
            | Self::UpdateTask { task_id, .. }
            | Self::Reprioritize { task_id, .. }
            | Self::Postpone { task_id, .. }
            | Self::Deprecate { task_id, .. } => Some(*task_id),
            Self::AddEdge { .. } | Self::RemoveEdge { .. } => None,
        }
    }
}

/// Impact summary computed by validation, persisted with the change set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactPreview {
    /// Tasks that would leave the Ready queue (regression or block).
    pub newly_blocked: Vec<Uuid>,
    /// Tasks that would enter the Ready queue.
    pub newly_ready: Vec<Uuid>,
    /// Net change to the Ready queue size.
    pub ready_queue_delta: i64,
    /// Claimed/Reserved tasks whose holds a material change would release.
    pub released_holds: Vec<Uuid>,
    /// InProgress tasks materially affected; their snapshots keep governing
    /// but subsequent stale heartbeats will be refused.
    pub stale_in_progress: Vec<Uuid>,
    /// Open checkpoint tasks whose candidate sets are touched.
    pub gate_implications: Vec<Uuid>,
    #[serde(default, flatten)]
    pub extras: HashMap<String, serde_json::Value>,
}

/// A versioned batch of DAG mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanChangeSet {
    pub id: Uuid,
    pub project_id: Uuid,
    pub base_plan_version: i64,
    /// Set when applied: `base + 1`.
    pub target_plan_version: Option<i64>,
    pub operations: Vec<PlanOperation>,
    pub status: ChangeSetStatus,
    pub impact_preview: Option<ImpactPreview>,
    pub submitted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanChangeSet {
    pub fn draft(
        project_id: Uuid,
        base_plan_version: i64,
        operations: Vec<PlanOperation>,
        submitted_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            base_plan_version,
            target_plan_version: None,
            operations,
            status: ChangeSetStatus::Draft,
            impact_preview: None,
            submitted_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One row per applied change set; `(project, version_number)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanVersion {
    pub id: Uuid,
    pub project_id: Uuid,
    pub version_number: i64,
    pub change_set_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_task() -> Task {
        let mut t = Task::new(Uuid::new_v4(), "migrate schema");
        t.capability_tags = vec!["sql".into()];
        t.exclusive_paths = vec!["db/schema.sql".into()];
        t.work_spec.objective = "add the audit table".into();
        t
    }

    #[test]
    fn work_spec_change_is_material() {
        let task = base_task();
        let changes = TaskChanges {
            work_spec: Some(WorkSpec {
                objective: "add the audit table and index".into(),
                ..task.work_spec.clone()
            }),
            ..TaskChanges::default()
        };
        assert!(changes.is_material_for(&task));
    }

    #[test]
    fn identical_work_spec_is_not_material() {
        let task = base_task();
        let changes = TaskChanges {
            work_spec: Some(task.work_spec.clone()),
            ..TaskChanges::default()
        };
        assert!(!changes.is_material_for(&task));
    }

    #[test]
    fn title_and_description_are_cosmetic() {
        let task = base_task();
        let changes = TaskChanges {
            title: Some("migrate schema (renamed)".into()),
            description: Some("longer prose".into()),
            ..TaskChanges::default()
        };
        assert!(!changes.is_material_for(&task));
    }

    #[test]
    fn path_and_class_changes_are_material() {
        let task = base_task();
        let changes = TaskChanges {
            exclusive_paths: Some(vec!["db/schema.sql".into(), "db/seeds.sql".into()]),
            ..TaskChanges::default()
        };
        assert!(changes.is_material_for(&task));

        let changes = TaskChanges {
            task_class: Some(TaskClass::Security),
            ..TaskChanges::default()
        };
        assert!(changes.is_material_for(&task));
    }

    #[test]
    fn operations_round_trip_as_tagged_json() {
        let op = PlanOperation::AddEdge {
            from_task_id: Uuid::new_v4(),
            to_task_id: Uuid::new_v4(),
            unlock_on: UnlockOn::Integrated,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "add_edge");
        let back: PlanOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
