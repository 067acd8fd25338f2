//! Phases and milestones: grouping entities with derived short ids.
//!
//! Short ids are `P<n>` for phases and `P<n>.M<m>` for milestones, where the
//! sequence numbers come from insertion order within the parent. Tasks extend
//! the scheme with `.T<k>` within their milestone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    /// Insertion order within the project, starting at 1.
    pub sequence: i64,
    pub short_id: String,
    pub created_at: DateTime<Utc>,
}

impl Phase {
    pub fn new(project_id: Uuid, name: impl Into<String>, sequence: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            sequence,
            short_id: phase_short_id(sequence),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub project_id: Uuid,
    pub phase_id: Uuid,
    pub name: String,
    /// Insertion order within the phase, starting at 1.
    pub sequence: i64,
    pub short_id: String,
    pub created_at: DateTime<Utc>,
}

impl Milestone {
    pub fn new(
        project_id: Uuid,
        phase_id: Uuid,
        phase_short_id: &str,
        name: impl Into<String>,
        sequence: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            phase_id,
            name: name.into(),
            sequence,
            short_id: milestone_short_id(phase_short_id, sequence),
            created_at: Utc::now(),
        }
    }
}

pub fn phase_short_id(sequence: i64) -> String {
    format!("P{sequence}")
}

pub fn milestone_short_id(phase_short_id: &str, sequence: i64) -> String {
    format!("{phase_short_id}.M{sequence}")
}

pub fn task_short_id(milestone_short_id: Option<&str>, sequence: i64) -> String {
    match milestone_short_id {
        Some(m) => format!("{m}.T{sequence}"),
        None => format!("T{sequence}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_derive_from_hierarchy() {
        assert_eq!(phase_short_id(1), "P1");
        assert_eq!(milestone_short_id("P1", 2), "P1.M2");
        assert_eq!(task_short_id(Some("P1.M2"), 3), "P1.M2.T3");
        assert_eq!(task_short_id(None, 7), "T7");
    }
}
