//! Domain models
//!
//! Pure entities with business logic and validation rules. Framework-agnostic;
//! no persistence concerns.

pub mod artifact;
pub mod auth;
pub mod config;
pub mod edge;
pub mod event;
pub mod gate;
pub mod hierarchy;
pub mod lease;
pub mod plan;
pub mod project;
pub mod snapshot;
pub mod task;

pub use artifact::{Artifact, CheckStatus, IntegrationAttempt, IntegrationOutcome, NewArtifact};
pub use auth::{hash_secret, ApiKey, ApiKeyStatus, Capability, Principal, RoleScope};
pub use config::{ContextConfig, CoreConfig, DatabaseConfig, LoggingConfig, SweepConfig, MAX_CONTEXT_DEPTH};
pub use edge::{DependencyEdge, UnlockOn};
pub use event::{EventDraft, EventEntity, EventRecord, EventType};
pub use gate::{
    evidence_satisfies, CheckpointView, EvidenceRef, EvidenceRequirement, GateCandidate,
    GateClass, GateCondition, GateDecision, GateOutcome, GateRule, GateScope, SlaState,
};
pub use hierarchy::{milestone_short_id, phase_short_id, task_short_id, Milestone, Phase};
pub use lease::{
    clamp_ttl, Lease, LeaseStatus, Reservation, ReservationStatus, DEFAULT_LEASE_TTL_SECONDS,
    DEFAULT_RESERVATION_TTL_SECONDS, MAX_TTL_SECONDS, MIN_TTL_SECONDS,
};
pub use plan::{
    ChangeSetStatus, ImpactPreview, NewTaskSpec, PlanChangeSet, PlanOperation, PlanVersion,
    TaskChanges,
};
pub use project::{Project, ProjectStatus};
pub use snapshot::ExecutionSnapshot;
pub use task::{Task, TaskClass, TaskState, WorkSpec};
