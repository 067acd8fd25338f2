//! Dependency edges.
//!
//! Directed, per-project. An edge blocks its successor until the source
//! task reaches the edge's unlock criterion in the finality order
//! Integrated > Implemented > everything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskState;

/// Predecessor state at which an edge stops blocking its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockOn {
    Implemented,
    Integrated,
}

impl Default for UnlockOn {
    fn default() -> Self {
        Self::Implemented
    }
}

impl UnlockOn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implemented => "implemented",
            Self::Integrated => "integrated",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "implemented" => Some(Self::Implemented),
            "integrated" => Some(Self::Integrated),
            _ => None,
        }
    }

    fn required_rank(&self) -> u8 {
        match self {
            Self::Implemented => 1,
            Self::Integrated => 2,
        }
    }

    /// Whether a source task in `state` satisfies this criterion.
    pub fn satisfied_by(&self, state: TaskState) -> bool {
        state.finality_rank() >= self.required_rank()
    }
}

/// A directed dependency: `to` waits on `from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: Uuid,
    pub project_id: Uuid,
    pub from_task_id: Uuid,
    pub to_task_id: Uuid,
    pub unlock_on: UnlockOn,
    pub created_at: DateTime<Utc>,
}

impl DependencyEdge {
    pub fn new(project_id: Uuid, from: Uuid, to: Uuid, unlock_on: UnlockOn) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            from_task_id: from,
            to_task_id: to,
            unlock_on,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implemented_unlock_accepts_both_final_states() {
        assert!(UnlockOn::Implemented.satisfied_by(TaskState::Implemented));
        assert!(UnlockOn::Implemented.satisfied_by(TaskState::Integrated));
        assert!(!UnlockOn::Implemented.satisfied_by(TaskState::InProgress));
        assert!(!UnlockOn::Implemented.satisfied_by(TaskState::Conflict));
    }

    #[test]
    fn integrated_unlock_requires_integration() {
        assert!(UnlockOn::Integrated.satisfied_by(TaskState::Integrated));
        assert!(!UnlockOn::Integrated.satisfied_by(TaskState::Implemented));
        assert!(!UnlockOn::Integrated.satisfied_by(TaskState::Ready));
    }
}
