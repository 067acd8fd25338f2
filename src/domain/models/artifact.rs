//! Work evidence: artifacts and integration attempts. Both are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Passed,
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A recorded piece of work output. Rows are never updated: a later check
/// result arrives as a fresh row for the same branch/commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub branch: String,
    pub commit_sha: String,
    pub check_status: CheckStatus,
    pub touched_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied artifact fields; ids and timestamps are assigned on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArtifact {
    pub branch: String,
    pub commit_sha: String,
    pub check_status: CheckStatus,
    #[serde(default)]
    pub touched_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationOutcome {
    Queued,
    Success,
    Conflict,
    FailedChecks,
}

impl IntegrationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Success => "success",
            Self::Conflict => "conflict",
            Self::FailedChecks => "failed_checks",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "success" => Some(Self::Success),
            "conflict" => Some(Self::Conflict),
            "failed_checks" => Some(Self::FailedChecks),
            _ => None,
        }
    }
}

/// One merge outcome report for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationAttempt {
    pub id: Uuid,
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub outcome: IntegrationOutcome,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}
