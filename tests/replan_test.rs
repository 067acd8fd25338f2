//! Replan integration: previews, atomic apply, material-change invalidation,
//! barrier mode, and InProgress continuity.

mod common;

use common::{agent, claim_one, claim_request, core, operator, planner, seed_project, seed_task};
use tascade::models::{
    PlanOperation, TaskChanges, TaskState, UnlockOn, WorkSpec,
};

#[tokio::test]
async fn apply_requires_matching_base_version() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let task = seed_task(&core, project.id, "work").await;

    let ops = vec![PlanOperation::Reprioritize { task_id: task.id, priority: 5 }];
    let first = core.replan
        .submit_change_set(&planner_p, project.id, ops.clone(), None)
        .await
        .unwrap();
    let second = core.replan
        .submit_change_set(&planner_p, project.id, ops, None)
        .await
        .unwrap();

    core.replan.preview(&planner_p, first.id).await.unwrap();
    core.replan.preview(&planner_p, second.id).await.unwrap();

    core.replan.apply(&planner_p, first.id, None).await.unwrap();
    // Second change set still claims base version 0; the project moved to 1.
    let err = core.replan.apply(&planner_p, second.id, None).await.unwrap_err();
    assert_eq!(err.kind(), "PLAN_VERSION_CONFLICT");

    let versions = {
        use tascade::adapters::sqlite::plan_repository;
        let mut conn = core.pool.acquire().await.unwrap();
        plan_repository::list_plan_versions(&mut conn, project.id).await.unwrap()
    };
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version_number, 1);
}

#[tokio::test]
async fn material_replan_releases_claim_and_stales_heartbeats() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let task = seed_task(&core, project.id, "work").await;
    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();
    assert_eq!(grant.task.id, task.id);

    let changes = TaskChanges {
        work_spec: Some(WorkSpec {
            objective: "work".into(),
            acceptance_criteria: vec!["new criterion".into()],
            ..WorkSpec::default()
        }),
        ..TaskChanges::default()
    };
    let cs = core.replan
        .submit_change_set(
            &planner_p,
            project.id,
            vec![PlanOperation::UpdateTask { task_id: task.id, changes }],
            None,
        )
        .await
        .unwrap();
    let preview = core.replan.preview(&planner_p, cs.id).await.unwrap();
    assert_eq!(preview.released_holds, vec![task.id]);

    let applied = core.replan.apply(&planner_p, cs.id, None).await.unwrap();
    assert_eq!(applied.plan_version, 1);
    assert_eq!(applied.released_holds, vec![task.id]);

    let task = core.dag.get_task(&planner_p, task.id).await.unwrap();
    assert_eq!(task.state, TaskState::Ready);
    assert!(task.fencing_counter > grant.lease.fencing_counter);
    assert_eq!(task.last_material_plan_version, 1);

    // The displaced agent's next heartbeat carries the old plan view.
    let err = core.scheduler.heartbeat(&grant.lease.token, 0).await.unwrap_err();
    assert!(matches!(err.kind(), "PLAN_STALE" | "LEASE_EXPIRED"));
}

#[tokio::test]
async fn priority_only_replan_preserves_claim() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let task = seed_task(&core, project.id, "work").await;
    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();

    let cs = core.replan
        .submit_change_set(
            &planner_p,
            project.id,
            vec![PlanOperation::Reprioritize { task_id: task.id, priority: 10 }],
            None,
        )
        .await
        .unwrap();
    let preview = core.replan.preview(&planner_p, cs.id).await.unwrap();
    assert!(preview.released_holds.is_empty());
    core.replan.apply(&planner_p, cs.id, None).await.unwrap();

    let task = core.dag.get_task(&planner_p, task.id).await.unwrap();
    assert_eq!(task.state, TaskState::Claimed);
    assert_eq!(task.priority, 10);
    assert_eq!(task.fencing_counter, grant.lease.fencing_counter);
    assert_eq!(task.last_material_plan_version, 0);

    // Heartbeats with the pre-replan view still succeed.
    core.scheduler.heartbeat(&grant.lease.token, 0).await.unwrap();
}

#[tokio::test]
async fn in_progress_work_survives_replans_on_its_snapshot() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let task = seed_task(&core, project.id, "work").await;
    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();
    let worker = agent(project.id, "agent-a");
    let snapshot = core.lifecycle.start(&worker, &grant.lease.token).await.unwrap();

    let changes = TaskChanges {
        work_spec: Some(WorkSpec {
            objective: "rescoped objective".into(),
            ..WorkSpec::default()
        }),
        ..TaskChanges::default()
    };
    let cs = core.replan
        .submit_change_set(
            &planner_p,
            project.id,
            vec![PlanOperation::UpdateTask { task_id: task.id, changes }],
            None,
        )
        .await
        .unwrap();
    let preview = core.replan.preview(&planner_p, cs.id).await.unwrap();
    assert_eq!(preview.stale_in_progress, vec![task.id]);
    let applied = core.replan.apply(&planner_p, cs.id, None).await.unwrap();
    assert_eq!(applied.stale_in_progress, vec![task.id]);

    // Never auto-aborted; the captured snapshot still governs.
    let task_now = core.dag.get_task(&planner_p, task.id).await.unwrap();
    assert_eq!(task_now.state, TaskState::InProgress);
    assert_eq!(snapshot.work_spec.objective, "work");
    assert_eq!(task_now.work_spec.objective, "rescoped objective");

    // Stale view heartbeats are refused; a current view succeeds.
    let err = core.scheduler.heartbeat(&grant.lease.token, 0).await.unwrap_err();
    assert_eq!(err.kind(), "PLAN_STALE");
    core.scheduler.heartbeat(&grant.lease.token, 1).await.unwrap();
}

#[tokio::test]
async fn barrier_pauses_claims_but_not_completions() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let operator_p = operator(project.id);
    seed_task(&core, project.id, "first").await;
    seed_task(&core, project.id, "second").await;

    let grant = claim_one(&core, project.id, "agent-a").await.unwrap();
    let worker = agent(project.id, "agent-a");
    core.lifecycle.start(&worker, &grant.lease.token).await.unwrap();

    core.replan.set_barrier(&operator_p, project.id, true).await.unwrap();

    let err = core.scheduler
        .claim(&agent(project.id, "agent-b"), project.id, claim_request("agent-b"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "CLAIMS_PAUSED");

    // Heartbeats and completions proceed under the barrier.
    core.scheduler.heartbeat(&grant.lease.token, 0).await.unwrap();
    core.lifecycle
        .submit_implemented(&worker, &grant.lease.token, Some(common::passing_artifact()), None, None)
        .await
        .unwrap();

    core.replan.set_barrier(&operator_p, project.id, false).await.unwrap();
    assert!(claim_one(&core, project.id, "agent-b").await.is_some());
}

#[tokio::test]
async fn change_set_ops_apply_atomically_with_edges_and_new_tasks() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let a = seed_task(&core, project.id, "a").await;
    let b = seed_task(&core, project.id, "b").await;

    let cs = core.replan
        .submit_change_set(
            &planner_p,
            project.id,
            vec![
                PlanOperation::AddTask { spec: common::task_spec("c") },
                PlanOperation::AddEdge {
                    from_task_id: a.id,
                    to_task_id: b.id,
                    unlock_on: UnlockOn::Implemented,
                },
            ],
            None,
        )
        .await
        .unwrap();
    let preview = core.replan.preview(&planner_p, cs.id).await.unwrap();
    assert!(preview.newly_blocked.contains(&b.id));

    core.replan.apply(&planner_p, cs.id, None).await.unwrap();
    let b = core.dag.get_task(&planner_p, b.id).await.unwrap();
    assert_eq!(b.state, TaskState::Backlog);

    let (tasks, edges) = core.dag.project_graph(&planner_p, project.id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    assert_eq!(edges.len(), 1);
}

#[tokio::test]
async fn cyclic_change_set_is_rejected_and_nothing_applies() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let a = seed_task(&core, project.id, "a").await;
    let b = seed_task(&core, project.id, "b").await;
    core.dag
        .add_dependency(&planner_p, project.id, a.id, b.id, UnlockOn::Implemented, None)
        .await
        .unwrap();

    let cs = core.replan
        .submit_change_set(
            &planner_p,
            project.id,
            vec![PlanOperation::AddEdge {
                from_task_id: b.id,
                to_task_id: a.id,
                unlock_on: UnlockOn::Implemented,
            }],
            None,
        )
        .await
        .unwrap();
    let err = core.replan.preview(&planner_p, cs.id).await.unwrap_err();
    assert_eq!(err.kind(), "CYCLE_DETECTED");

    // Rejected change sets cannot be applied.
    let err = core.replan.apply(&planner_p, cs.id, None).await.unwrap_err();
    assert_eq!(err.kind(), "PRECONDITION_FAILED");

    let project_now = core.dag.get_project(&planner_p, project.id).await.unwrap();
    assert_eq!(project_now.plan_version, 0);
}

#[tokio::test]
async fn apply_replays_under_the_same_correlation_id() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner_p = planner(project.id);
    let task = seed_task(&core, project.id, "work").await;

    let cs = core.replan
        .submit_change_set(
            &planner_p,
            project.id,
            vec![PlanOperation::Reprioritize { task_id: task.id, priority: 7 }],
            None,
        )
        .await
        .unwrap();
    core.replan.preview(&planner_p, cs.id).await.unwrap();

    let first = core.replan.apply(&planner_p, cs.id, Some("replan-42")).await.unwrap();
    let replay = core.replan.apply(&planner_p, cs.id, Some("replan-42")).await.unwrap();
    assert_eq!(first.plan_version, replay.plan_version);

    let project_now = core.dag.get_project(&planner_p, project.id).await.unwrap();
    assert_eq!(project_now.plan_version, 1);
}
