//! Shared helpers for the integration suites: an in-memory core, a manual
//! clock, and principals for each role.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tascade::adapters::sqlite::create_test_pool;
use tascade::domain::ports::Clock;
use tascade::models::{
    CheckStatus, CoreConfig, NewArtifact, NewTaskSpec, Principal, Project, RoleScope, Task,
    WorkSpec,
};
use tascade::services::{ClaimGrant, ClaimRequest};
use tascade::Core;

/// Test clock: starts at a fixed instant, advanced explicitly.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub async fn core() -> (Core, Arc<ManualClock>) {
    let pool = create_test_pool().await.expect("test pool");
    let clock = Arc::new(ManualClock::new());
    let core = Core::with_pool(pool, CoreConfig::default(), clock.clone())
        .await
        .expect("core assembly");
    (core, clock)
}

pub fn principal(project_id: Uuid, role: RoleScope) -> Principal {
    Principal {
        api_key_id: Uuid::new_v4(),
        project_id: Some(project_id),
        role_scopes: vec![role],
        actor_id: format!("{}-key", role.as_str()),
    }
}

pub fn planner(project_id: Uuid) -> Principal {
    principal(project_id, RoleScope::Planner)
}

pub fn agent(project_id: Uuid, name: &str) -> Principal {
    Principal {
        api_key_id: Uuid::new_v4(),
        project_id: Some(project_id),
        role_scopes: vec![RoleScope::Agent],
        actor_id: name.to_string(),
    }
}

pub fn reviewer(project_id: Uuid) -> Principal {
    principal(project_id, RoleScope::Reviewer)
}

pub fn operator(project_id: Uuid) -> Principal {
    principal(project_id, RoleScope::Operator)
}

pub async fn seed_project(core: &Core, name: &str) -> Project {
    core.dag
        .create_project(&Principal::root(), name, None)
        .await
        .expect("project")
}

pub fn task_spec(title: &str) -> NewTaskSpec {
    NewTaskSpec {
        title: title.to_string(),
        description: format!("{title} description"),
        work_spec: WorkSpec {
            objective: title.to_string(),
            ..WorkSpec::default()
        },
        ..NewTaskSpec::default()
    }
}

pub async fn seed_task(core: &Core, project_id: Uuid, title: &str) -> Task {
    core.dag
        .create_task(&planner(project_id), project_id, task_spec(title), None)
        .await
        .expect("task")
}

pub fn claim_request(agent_id: &str) -> ClaimRequest {
    ClaimRequest {
        agent_id: agent_id.to_string(),
        capabilities: Vec::new(),
        seen_plan_version: None,
        ttl_seconds: None,
        correlation_id: None,
    }
}

/// Claim whatever is on top of the queue for `agent_id`.
pub async fn claim_one(core: &Core, project_id: Uuid, agent_id: &str) -> Option<ClaimGrant> {
    core.scheduler
        .claim(&agent(project_id, agent_id), project_id, claim_request(agent_id))
        .await
        .expect("claim")
}

pub fn passing_artifact() -> NewArtifact {
    NewArtifact {
        branch: "work/feature".to_string(),
        commit_sha: "a1b2c3d4".to_string(),
        check_status: CheckStatus::Passed,
        touched_files: vec!["src/lib.rs".to_string()],
    }
}

/// Drive a freshly created Ready task through claim, start, and implemented
/// submission. Returns the task and the claiming grant.
pub async fn drive_to_implemented(
    core: &Core,
    project_id: Uuid,
    agent_id: &str,
) -> (Task, ClaimGrant) {
    let grant = claim_one(core, project_id, agent_id).await.expect("grant");
    let worker = agent(project_id, agent_id);
    core.lifecycle
        .start(&worker, &grant.lease.token)
        .await
        .expect("start");
    let task = core
        .lifecycle
        .submit_implemented(&worker, &grant.lease.token, Some(passing_artifact()), None, None)
        .await
        .expect("implemented");
    (task, grant)
}
