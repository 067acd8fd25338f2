//! Scheduler integration: claim protocol, reservations, heartbeats, expiry.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{agent, claim_one, claim_request, core, operator, planner, seed_project, seed_task};
use tascade::models::{LeaseStatus, TaskState};

#[tokio::test]
async fn concurrent_claims_grant_exactly_one_lease() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    seed_task(&core, project.id, "only task").await;

    let core = Arc::new(core);
    let (left, right) = tokio::join!(
        {
            let core = core.clone();
            let project_id = project.id;
            async move { claim_one(&core, project_id, "agent-a").await }
        },
        {
            let core = core.clone();
            let project_id = project.id;
            async move { claim_one(&core, project_id, "agent-b").await }
        },
    );

    let granted = [&left, &right].iter().filter(|g| g.is_some()).count();
    assert_eq!(granted, 1, "exactly one claimer wins the single task");
    let grant = left.or(right).unwrap();
    assert_eq!(grant.task.state, TaskState::Claimed);
    assert_eq!(grant.lease.status, LeaseStatus::Active);
    assert_eq!(grant.lease.fencing_counter, grant.task.fencing_counter);
    assert_eq!(grant.snapshot.task_id, grant.task.id);
}

#[tokio::test]
async fn claim_skips_capability_mismatches() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner = planner(project.id);
    let mut spec = common::task_spec("needs sql");
    spec.capability_tags = vec!["sql".to_string()];
    core.dag.create_task(&planner, project.id, spec, None).await.unwrap();

    let mut request = claim_request("agent-a");
    request.capabilities = vec!["rust".to_string()];
    let grant = core.scheduler
        .claim(&agent(project.id, "agent-a"), project.id, request)
        .await
        .unwrap();
    assert!(grant.is_none());

    let mut request = claim_request("agent-a");
    request.capabilities = vec!["rust".to_string(), "sql".to_string()];
    let grant = core.scheduler
        .claim(&agent(project.id, "agent-a"), project.id, request)
        .await
        .unwrap();
    assert!(grant.is_some());
}

#[tokio::test]
async fn ranking_prefers_priority_then_stability() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner = planner(project.id);

    let mut low = common::task_spec("low urgency");
    low.priority = 500;
    core.dag.create_task(&planner, project.id, low, None).await.unwrap();
    let mut high = common::task_spec("high urgency");
    high.priority = 1;
    let high = core.dag.create_task(&planner, project.id, high, None).await.unwrap();

    let queue = core.scheduler
        .list_ready_tasks(&agent(project.id, "agent-a"), project.id, &[])
        .await
        .unwrap();
    assert_eq!(queue.first().map(|t| t.id), Some(high.id));

    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();
    assert_eq!(grant.task.id, high.id);
}

#[tokio::test]
async fn reserved_tasks_are_hidden_from_other_agents() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let task = seed_task(&core, project.id, "directed work").await;

    core.scheduler
        .assign(&operator(project.id), task.id, "agent-special", None, None)
        .await
        .unwrap();

    // Another agent sees nothing and claims nothing.
    assert!(claim_one(&core, project.id, "agent-other").await.is_none());

    // The assignee claims it; the reservation is consumed.
    let grant = claim_one(&core, project.id, "agent-special").await.unwrap();
    assert_eq!(grant.task.id, task.id);
    assert_eq!(grant.task.state, TaskState::Claimed);
}

#[tokio::test]
async fn reservation_expiry_returns_task_to_ready_exactly_once() {
    let (core, clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let task = seed_task(&core, project.id, "directed work").await;

    core.scheduler
        .assign(&operator(project.id), task.id, "agent-special", Some(60), None)
        .await
        .unwrap();

    clock.advance(Duration::seconds(61));
    assert_eq!(core.scheduler.sweep_expired_reservations().await.unwrap(), 1);
    let task = core.dag.get_task(&planner(project.id), task.id).await.unwrap();
    assert_eq!(task.state, TaskState::Ready);

    // Second sweep is a no-op.
    assert_eq!(core.scheduler.sweep_expired_reservations().await.unwrap(), 0);
}

#[tokio::test]
async fn heartbeat_extends_and_release_restores_ready() {
    let (core, clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let task = seed_task(&core, project.id, "work").await;
    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();

    clock.advance(Duration::seconds(600));
    let extended = core.scheduler.heartbeat(&grant.lease.token, 0).await.unwrap();
    assert!(extended.expires_at > grant.lease.expires_at);

    core.scheduler
        .release_lease(&agent(project.id, "agent-a"), &grant.lease.token)
        .await
        .unwrap();
    let task = core.dag.get_task(&planner(project.id), task.id).await.unwrap();
    assert_eq!(task.state, TaskState::Ready);
    assert!(task.fencing_counter > grant.lease.fencing_counter);

    // Released token can no longer heartbeat.
    let err = core.scheduler.heartbeat(&grant.lease.token, 0).await.unwrap_err();
    assert_eq!(err.kind(), "LEASE_EXPIRED");
}

#[tokio::test]
async fn lease_expiry_recovers_crashed_claims_with_fresh_fencing() {
    let (core, clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    seed_task(&core, project.id, "work").await;

    let dead = claim_one(&core, project.id, "agent-crash").await.unwrap();

    clock.advance(Duration::seconds(dead.lease.ttl_seconds + 1));
    assert_eq!(core.scheduler.sweep_expired_leases().await.unwrap(), 1);

    let revived = claim_one(&core, project.id, "agent-next").await.unwrap();
    assert_eq!(revived.task.id, dead.task.id);
    assert_ne!(revived.lease.token, dead.lease.token);
    assert!(revived.lease.fencing_counter > dead.lease.fencing_counter);

    // The dead agent's token is fenced out everywhere.
    let err = core.scheduler.heartbeat(&dead.lease.token, 0).await.unwrap_err();
    assert_eq!(err.kind(), "LEASE_EXPIRED");
}

#[tokio::test]
async fn claim_respects_plan_version_staleness() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    seed_task(&core, project.id, "work").await;

    let mut request = claim_request("agent-a");
    request.seen_plan_version = Some(-1);
    // plan_version starts at 0, so seeing -1 is stale
    let err = core.scheduler
        .claim(&agent(project.id, "agent-a"), project.id, request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PLAN_STALE");
}

#[tokio::test]
async fn unlock_on_integrated_keeps_dependents_back() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let a = seed_task(&core, project.id, "base").await;
    let b = seed_task(&core, project.id, "strict follower").await;
    core.dag
        .add_dependency(&planner_p, project.id, a.id, b.id, tascade::models::UnlockOn::Integrated, None)
        .await
        .unwrap();

    let (a_done, _) = common::drive_to_implemented(&core, project.id, "agent-a").await;
    assert_eq!(a_done.id, a.id);
    assert_eq!(a_done.state, TaskState::Implemented);

    // Implemented does not satisfy an integrated-unlock edge.
    let b = core.dag.get_task(&planner_p, b.id).await.unwrap();
    assert_eq!(b.state, TaskState::Backlog);
}
