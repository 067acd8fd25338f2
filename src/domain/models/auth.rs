//! Principals, role scopes, and capability requirements.
//!
//! A principal is an API key bound to one project with a set of role scopes.
//! Every engine operation declares the capability it needs; checks run before
//! any state is touched. Only the key's sha256 digest is ever stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleScope {
    Planner,
    Agent,
    Reviewer,
    Operator,
    Admin,
}

impl RoleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Agent => "agent",
            Self::Reviewer => "reviewer",
            Self::Operator => "operator",
            Self::Admin => "admin",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "planner" => Some(Self::Planner),
            "agent" => Some(Self::Agent),
            "reviewer" => Some(Self::Reviewer),
            "operator" => Some(Self::Operator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Capability an operation requires, mapped to the role scopes that hold it.
/// Admin implicitly holds every capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Bootstrap-only: project-scoped principals may not create projects.
    ProjectCreate,
    ProjectRead,
    PlanEdit,
    ReplanSubmit,
    ReplanApply,
    SchedulePull,
    ScheduleAssign,
    TransitionExecute,
    IntegrationReport,
    GateDecide,
    GateRuleEdit,
    KeyAdmin,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreate => "project_create",
            Self::ProjectRead => "project_read",
            Self::PlanEdit => "plan_edit",
            Self::ReplanSubmit => "replan_submit",
            Self::ReplanApply => "replan_apply",
            Self::SchedulePull => "schedule_pull",
            Self::ScheduleAssign => "schedule_assign",
            Self::TransitionExecute => "transition_execute",
            Self::IntegrationReport => "integration_report",
            Self::GateDecide => "gate_decide",
            Self::GateRuleEdit => "gate_rule_edit",
            Self::KeyAdmin => "key_admin",
        }
    }

    /// Role scopes that hold this capability (admin is implicit).
    pub fn allowed_roles(&self) -> &'static [RoleScope] {
        match self {
            Self::ProjectCreate | Self::KeyAdmin => &[],
            Self::ProjectRead => &[
                RoleScope::Planner,
                RoleScope::Agent,
                RoleScope::Reviewer,
                RoleScope::Operator,
            ],
            Self::PlanEdit | Self::ReplanSubmit => &[RoleScope::Planner],
            Self::ReplanApply => &[RoleScope::Planner, RoleScope::Operator],
            Self::SchedulePull | Self::TransitionExecute => &[RoleScope::Agent],
            Self::ScheduleAssign => &[RoleScope::Planner, RoleScope::Operator],
            Self::IntegrationReport => &[RoleScope::Operator],
            Self::GateDecide => &[RoleScope::Reviewer],
            Self::GateRuleEdit => &[RoleScope::Planner, RoleScope::Operator],
        }
    }
}

/// Authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub api_key_id: Uuid,
    /// Project the key is bound to. `None` only for the root principal.
    pub project_id: Option<Uuid>,
    pub role_scopes: Vec<RoleScope>,
    /// Stable actor identity recorded in changelogs and decisions.
    pub actor_id: String,
}

impl Principal {
    /// Unscoped admin identity for bootstrap and embedded/test use.
    pub fn root() -> Self {
        Self {
            api_key_id: Uuid::nil(),
            project_id: None,
            role_scopes: vec![RoleScope::Admin],
            actor_id: "root".to_string(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role_scopes.contains(&RoleScope::Admin)
    }

    pub fn has_role(&self, role: RoleScope) -> bool {
        self.role_scopes.contains(&role)
    }

    /// Enforce capability and project scope for an operation.
    ///
    /// Scope is checked first: a key for project A probing project B learns
    /// nothing about B's role requirements.
    pub fn require(&self, capability: Capability, target_project: Option<Uuid>) -> CoreResult<()> {
        if let (Some(bound), Some(target)) = (self.project_id, target_project) {
            if bound != target && !self.is_admin() {
                return Err(CoreError::ProjectScopeViolation {
                    principal: bound,
                    target,
                });
            }
        }
        if self.is_admin() {
            return Ok(());
        }
        let allowed = capability.allowed_roles();
        if allowed.iter().any(|r| self.has_role(*r)) {
            return Ok(());
        }
        Err(CoreError::RoleScopeViolation {
            held: self.role_scopes.iter().map(|r| r.as_str().to_string()).collect(),
            needed: capability.as_str().to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Stored key record. The secret itself never persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub role_scopes: Vec<RoleScope>,
    pub status: ApiKeyStatus,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Lowercase hex sha256 of a key secret.
pub fn hash_secret(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(project: Uuid, roles: Vec<RoleScope>) -> Principal {
        Principal {
            api_key_id: Uuid::new_v4(),
            project_id: Some(project),
            role_scopes: roles,
            actor_id: "key-1".into(),
        }
    }

    #[test]
    fn scope_violation_beats_role_check() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let p = principal(a, vec![RoleScope::Planner]);
        let err = p.require(Capability::PlanEdit, Some(b)).unwrap_err();
        assert_eq!(err.kind(), "PROJECT_SCOPE_VIOLATION");
    }

    #[test]
    fn role_scopes_gate_capabilities() {
        let project = Uuid::new_v4();
        let agent = principal(project, vec![RoleScope::Agent]);
        assert!(agent.require(Capability::SchedulePull, Some(project)).is_ok());
        let err = agent.require(Capability::PlanEdit, Some(project)).unwrap_err();
        assert_eq!(err.kind(), "ROLE_SCOPE_VIOLATION");
    }

    #[test]
    fn project_create_is_admin_only() {
        let project = Uuid::new_v4();
        for role in [
            RoleScope::Planner,
            RoleScope::Agent,
            RoleScope::Reviewer,
            RoleScope::Operator,
        ] {
            let p = principal(project, vec![role]);
            assert!(p.require(Capability::ProjectCreate, None).is_err());
        }
        assert!(Principal::root().require(Capability::ProjectCreate, None).is_ok());
    }

    #[test]
    fn admin_crosses_projects() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let p = principal(a, vec![RoleScope::Admin]);
        assert!(p.require(Capability::PlanEdit, Some(b)).is_ok());
    }

    #[test]
    fn hash_is_stable_and_hex() {
        let h = hash_secret("tsk_live_abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_secret("tsk_live_abc"));
        assert_ne!(h, hash_secret("tsk_live_abd"));
    }
}
