//! Execution snapshots.
//!
//! Captured when a claim is granted, binding the lease to the work spec and
//! plan version in effect at that moment. Workers read the snapshot, not the
//! live task row, so InProgress work survives replans untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Task, WorkSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub id: Uuid,
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub lease_token: String,
    pub plan_version: i64,
    pub work_spec: WorkSpec,
    pub captured_at: DateTime<Utc>,
}

impl ExecutionSnapshot {
    pub fn capture(
        task: &Task,
        lease_token: impl Into<String>,
        plan_version: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            project_id: task.project_id,
            lease_token: lease_token.into(),
            plan_version,
            work_spec: task.work_spec.clone(),
            captured_at: now,
        }
    }
}
