//! Core error taxonomy.
//!
//! Every operation surfaces one of these kinds, never a generic failure.
//! Concurrency kinds are safe for clients to retry with backoff.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the core engines.
#[derive(Debug, Error)]
pub enum CoreError {
    // Validation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    // DAG
    #[error("Dependency endpoints belong to different projects: {from} -> {to}")]
    DependencyProjectMismatch { from: Uuid, to: Uuid },

    #[error("Dependency task not found: {0}")]
    DependencyTaskNotFound(Uuid),

    #[error("Adding edge {from} -> {to} would create a cycle")]
    CycleDetected { from: Uuid, to: Uuid },

    #[error("Short id already taken: {0}")]
    ShortIdConflict(String),

    // State machine
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    // Concurrency
    #[error("Task {0} already holds an active lease")]
    LeaseConflict(Uuid),

    #[error("Lease is no longer active: {0}")]
    LeaseExpired(String),

    #[error("Stale fencing token: presented {presented}, current {current}")]
    FencingStale { presented: i64, current: i64 },

    #[error("Task {0} already holds an active reservation")]
    ReservationConflict(Uuid),

    #[error("Claims are paused while a replan barrier is active on project {0}")]
    ClaimsPaused(Uuid),

    // Replan
    #[error("Caller plan version {seen} is behind current {current}")]
    PlanStale { seen: i64, current: i64 },

    #[error("Change set base version {base} does not match current plan version {current}")]
    PlanVersionConflict { base: i64, current: i64 },

    // Gate
    #[error("No approving gate decision with required evidence for task {0}")]
    GateEvidenceRequired(Uuid),

    #[error("Gate decision actor matches the task claimant: {0}")]
    GateSelfReview(String),

    #[error("Force mode requires the admin capability")]
    GateForceRequiresAdmin,

    // Auth
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Role scopes {held:?} do not cover capability {needed}")]
    RoleScopeViolation { held: Vec<String>, needed: String },

    #[error("Principal is scoped to project {principal} but targeted {target}")]
    ProjectScopeViolation { principal: Uuid, target: Uuid },

    // Infrastructure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Stable machine-readable kind, for transports and client backoff logic.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            Self::DependencyProjectMismatch { .. } => "DEPENDENCY_PROJECT_MISMATCH",
            Self::DependencyTaskNotFound(_) => "DEPENDENCY_TASK_NOT_FOUND",
            Self::CycleDetected { .. } => "CYCLE_DETECTED",
            Self::ShortIdConflict(_) => "SHORT_ID_CONFLICT",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Self::LeaseConflict(_) => "LEASE_CONFLICT",
            Self::LeaseExpired(_) => "LEASE_EXPIRED",
            Self::FencingStale { .. } => "FENCING_STALE",
            Self::ReservationConflict(_) => "RESERVATION_CONFLICT",
            Self::ClaimsPaused(_) => "CLAIMS_PAUSED",
            Self::PlanStale { .. } => "PLAN_STALE",
            Self::PlanVersionConflict { .. } => "PLAN_VERSION_CONFLICT",
            Self::GateEvidenceRequired(_) => "GATE_EVIDENCE_REQUIRED",
            Self::GateSelfReview(_) => "GATE_SELF_REVIEW",
            Self::GateForceRequiresAdmin => "GATE_FORCE_REQUIRES_ADMIN",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::RoleScopeViolation { .. } => "ROLE_SCOPE_VIOLATION",
            Self::ProjectScopeViolation { .. } => "PROJECT_SCOPE_VIOLATION",
            Self::Storage(_) => "STORAGE",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Whether a client may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LeaseConflict(_) | Self::ReservationConflict(_) | Self::ClaimsPaused(_)
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        let id = Uuid::new_v4();
        assert_eq!(CoreError::TaskNotFound(id).kind(), "TASK_NOT_FOUND");
        assert_eq!(
            CoreError::CycleDetected { from: id, to: id }.kind(),
            "CYCLE_DETECTED"
        );
        assert_eq!(
            CoreError::PlanStale { seen: 1, current: 2 }.kind(),
            "PLAN_STALE"
        );
        assert_eq!(
            CoreError::GateForceRequiresAdmin.kind(),
            "GATE_FORCE_REQUIRES_ADMIN"
        );
    }

    #[test]
    fn concurrency_kinds_are_retryable() {
        let id = Uuid::new_v4();
        assert!(CoreError::LeaseConflict(id).is_retryable());
        assert!(CoreError::ClaimsPaused(id).is_retryable());
        assert!(!CoreError::TaskNotFound(id).is_retryable());
        assert!(!CoreError::FencingStale { presented: 1, current: 2 }.is_retryable());
    }
}
