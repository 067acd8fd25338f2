//! Lifecycle integration: blocks, cancellation, abandonment, merge results.

mod common;

use common::{agent, claim_one, core, operator, planner, seed_project, seed_task};
use tascade::models::{IntegrationOutcome, Principal, TaskState, UnlockOn};

#[tokio::test]
async fn block_and_unblock_round_trip() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let operator_p = operator(project.id);
    let task = seed_task(&core, project.id, "work").await;

    let blocked = core.lifecycle
        .block(&operator_p, task.id, "waiting on vendor API")
        .await
        .unwrap();
    assert_eq!(blocked.state, TaskState::Blocked);

    // Blocked tasks are invisible to the pull queue.
    assert!(claim_one(&core, project.id, "agent-a").await.is_none());

    let unblocked = core.lifecycle.unblock(&operator_p, task.id).await.unwrap();
    assert_eq!(unblocked.state, TaskState::Ready);

    let err = core.lifecycle.block(&operator_p, task.id, "  ").await.unwrap_err();
    assert_eq!(err.kind(), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn unblock_regresses_when_predecessors_are_unmet() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let operator_p = operator(project.id);
    let a = seed_task(&core, project.id, "a").await;
    let b = seed_task(&core, project.id, "b").await;

    core.lifecycle.block(&operator_p, b.id, "parked").await.unwrap();
    core.dag
        .add_dependency(&planner_p, project.id, a.id, b.id, UnlockOn::Implemented, None)
        .await
        .unwrap();

    // Unblock lands in Backlog, not Ready: the new edge is unsatisfied.
    let b = core.lifecycle.unblock(&operator_p, b.id).await.unwrap();
    assert_eq!(b.state, TaskState::Backlog);
}

#[tokio::test]
async fn cancel_is_limited_to_unstarted_tasks() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let task = seed_task(&core, project.id, "work").await;

    claim_one(&core, project.id, "agent-a").await.unwrap();
    let err = core.lifecycle.cancel(&planner_p, task.id, Some("descoped")).await.unwrap_err();
    assert_eq!(err.kind(), "ILLEGAL_TRANSITION");

    let other = seed_task(&core, project.id, "other").await;
    let cancelled = core.lifecycle.cancel(&planner_p, other.id, Some("descoped")).await.unwrap();
    assert_eq!(cancelled.state, TaskState::Cancelled);
}

#[tokio::test]
async fn abandon_releases_the_lease_and_fences_the_holder() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let task = seed_task(&core, project.id, "work").await;
    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();
    let worker = agent(project.id, "agent-a");
    core.lifecycle.start(&worker, &grant.lease.token).await.unwrap();

    let abandoned = core.lifecycle
        .abandon(&worker, task.id, Some("environment broken"))
        .await
        .unwrap();
    assert_eq!(abandoned.state, TaskState::Abandoned);
    assert!(abandoned.fencing_counter > grant.lease.fencing_counter);

    let err = core.scheduler.heartbeat(&grant.lease.token, 0).await.unwrap_err();
    assert_eq!(err.kind(), "LEASE_EXPIRED");
}

#[tokio::test]
async fn start_requires_an_active_fenced_lease() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    seed_task(&core, project.id, "work").await;
    let worker = agent(project.id, "agent-a");

    let err = core.lifecycle.start(&worker, "no-such-token").await.unwrap_err();
    assert_eq!(err.kind(), "LEASE_EXPIRED");

    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();
    let snapshot = core.lifecycle.start(&worker, &grant.lease.token).await.unwrap();
    assert_eq!(snapshot.id, grant.snapshot.id);
}

#[tokio::test]
async fn submit_without_passing_checks_is_refused() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    seed_task(&core, project.id, "work").await;
    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();
    let worker = agent(project.id, "agent-a");
    core.lifecycle.start(&worker, &grant.lease.token).await.unwrap();

    let mut failing = common::passing_artifact();
    failing.check_status = tascade::models::CheckStatus::Failed;
    let err = core.lifecycle
        .submit_implemented(&worker, &grant.lease.token, Some(failing), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PRECONDITION_FAILED");

    // Admin force with a reason overrides; the lease is consumed.
    let task = core.lifecycle
        .submit_implemented(
            &Principal::root(),
            &grant.lease.token,
            None,
            Some("manual verification on staging"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Implemented);
}

#[tokio::test]
async fn merge_conflict_regresses_dependents_and_retries() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let operator_p = operator(project.id);
    let a = seed_task(&core, project.id, "base").await;
    let b = seed_task(&core, project.id, "follower").await;
    core.dag
        .add_dependency(&planner_p, project.id, a.id, b.id, UnlockOn::Implemented, None)
        .await
        .unwrap();

    let (a_done, _) = common::drive_to_implemented(&core, project.id, "agent-a").await;
    assert_eq!(a_done.id, a.id);
    // b unlocked by implemented
    let b_now = core.dag.get_task(&planner_p, b.id).await.unwrap();
    assert_eq!(b_now.state, TaskState::Ready);

    // Conflict pulls a back and regresses b.
    core.lifecycle
        .report_integration_result(
            &operator_p,
            a.id,
            IntegrationOutcome::Conflict,
            Some("overlapping hunk in src/db.rs".to_string()),
            None,
        )
        .await
        .unwrap();
    let a_now = core.dag.get_task(&planner_p, a.id).await.unwrap();
    assert_eq!(a_now.state, TaskState::Conflict);
    let b_now = core.dag.get_task(&planner_p, b.id).await.unwrap();
    assert_eq!(b_now.state, TaskState::Backlog);

    // Retry returns the task to the queue.
    let a_now = core.lifecycle.retry_conflict(&operator_p, a.id).await.unwrap();
    assert_eq!(a_now.state, TaskState::Ready);
}

#[tokio::test]
async fn integration_attempts_accumulate_append_only() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let operator_p = operator(project.id);
    seed_task(&core, project.id, "work").await;
    let (task, _) = common::drive_to_implemented(&core, project.id, "agent-a").await;

    core.lifecycle
        .report_integration_result(&operator_p, task.id, IntegrationOutcome::Queued, None, None)
        .await
        .unwrap();
    core.lifecycle
        .report_integration_result(
            &operator_p,
            task.id,
            IntegrationOutcome::FailedChecks,
            Some("lint failure".to_string()),
            None,
        )
        .await
        .unwrap();

    let attempts = {
        use tascade::adapters::sqlite::artifact_repository;
        let mut conn = core.pool.acquire().await.unwrap();
        artifact_repository::list_integration_attempts(&mut conn, task.id).await.unwrap()
    };
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].outcome, IntegrationOutcome::Queued);
    assert_eq!(attempts[1].outcome, IntegrationOutcome::FailedChecks);
}
