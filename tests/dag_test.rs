//! DAG store integration: short ids, edge invariants, bounded context.

mod common;

use common::{core, planner, seed_project, seed_task, task_spec};
use tascade::models::{NewTaskSpec, TaskState, UnlockOn};

#[tokio::test]
async fn short_ids_follow_hierarchy_and_insertion_order() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner = planner(project.id);

    let phase = core.dag.create_phase(&planner, project.id, "Foundations").await.unwrap();
    assert_eq!(phase.short_id, "P1");
    let phase2 = core.dag.create_phase(&planner, project.id, "Delivery").await.unwrap();
    assert_eq!(phase2.short_id, "P2");

    let milestone = core.dag.create_milestone(&planner, phase.id, "Storage").await.unwrap();
    assert_eq!(milestone.short_id, "P1.M1");

    let spec = NewTaskSpec {
        milestone_id: Some(milestone.id),
        ..task_spec("schema migration")
    };
    let task = core.dag.create_task(&planner, project.id, spec, None).await.unwrap();
    assert_eq!(task.short_id, "P1.M1.T1");
    assert_eq!(task.phase_id, Some(phase.id));

    // Milestone-less tasks draw from a project-scoped sequence.
    let loose = seed_task(&core, project.id, "loose end").await;
    assert_eq!(loose.short_id, "T1");
}

#[tokio::test]
async fn tasks_without_dependencies_become_ready() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let task = seed_task(&core, project.id, "standalone").await;
    assert_eq!(task.state, TaskState::Ready);
    assert!(task.ready_at.is_some());
}

#[tokio::test]
async fn adding_an_edge_regresses_an_unmet_dependent() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner = planner(project.id);
    let a = seed_task(&core, project.id, "a").await;
    let b = seed_task(&core, project.id, "b").await;
    assert_eq!(b.state, TaskState::Ready);

    core.dag
        .add_dependency(&planner, project.id, a.id, b.id, UnlockOn::Implemented, None)
        .await
        .unwrap();
    let b = core.dag.get_task(&planner, b.id).await.unwrap();
    assert_eq!(b.state, TaskState::Backlog);
}

#[tokio::test]
async fn edge_validation_error_kinds() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let other = seed_project(&core, "beta").await;
    let planner_a = planner(project.id);
    let a = seed_task(&core, project.id, "a").await;
    let b = seed_task(&core, project.id, "b").await;
    let foreign = seed_task(&core, other.id, "foreign").await;

    // unknown endpoint
    let ghost = uuid::Uuid::new_v4();
    let err = core.dag
        .add_dependency(&planner_a, project.id, ghost, b.id, UnlockOn::Implemented, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "DEPENDENCY_TASK_NOT_FOUND");

    // cross-project endpoints
    let err = core.dag
        .add_dependency(&planner_a, project.id, foreign.id, b.id, UnlockOn::Implemented, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "DEPENDENCY_PROJECT_MISMATCH");

    // self-loop closes a length-1 cycle
    let err = core.dag
        .add_dependency(&planner_a, project.id, a.id, a.id, UnlockOn::Implemented, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "CYCLE_DETECTED");
}

#[tokio::test]
async fn cycle_rejection_at_lengths_two_and_n() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner = planner(project.id);
    let a = seed_task(&core, project.id, "a").await;
    let b = seed_task(&core, project.id, "b").await;
    let c = seed_task(&core, project.id, "c").await;
    let d = seed_task(&core, project.id, "d").await;

    core.dag.add_dependency(&planner, project.id, a.id, b.id, UnlockOn::Implemented, None).await.unwrap();
    // length-2 cycle
    let err = core.dag
        .add_dependency(&planner, project.id, b.id, a.id, UnlockOn::Implemented, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "CYCLE_DETECTED");

    // length-N cycle via a chain a -> b -> c -> d
    core.dag.add_dependency(&planner, project.id, b.id, c.id, UnlockOn::Implemented, None).await.unwrap();
    core.dag.add_dependency(&planner, project.id, c.id, d.id, UnlockOn::Implemented, None).await.unwrap();
    let err = core.dag
        .add_dependency(&planner, project.id, d.id, a.id, UnlockOn::Implemented, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "CYCLE_DETECTED");

    // the reverse-direction edge is fine
    core.dag
        .add_dependency(&planner, project.id, a.id, d.id, UnlockOn::Implemented, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn context_depth_zero_returns_only_the_target() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner = planner(project.id);
    let a = seed_task(&core, project.id, "a").await;
    let b = seed_task(&core, project.id, "b").await;
    core.dag.add_dependency(&planner, project.id, a.id, b.id, UnlockOn::Implemented, None).await.unwrap();

    let graph = core.context
        .task_context(&planner, b.id, Some(0), Some(0), true)
        .await
        .unwrap();
    assert!(graph.ancestors.is_empty());
    assert!(graph.dependents.is_empty());
    assert_eq!(graph.task_id, b.id);
}

#[tokio::test]
async fn context_is_bounded_and_stable_at_max_depth() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner = planner(project.id);

    // chain t0 -> t1 -> ... -> t7
    let mut chain = Vec::new();
    for i in 0..8 {
        chain.push(seed_task(&core, project.id, &format!("t{i}")).await);
    }
    for pair in chain.windows(2) {
        core.dag
            .add_dependency(&planner, project.id, pair[0].id, pair[1].id, UnlockOn::Implemented, None)
            .await
            .unwrap();
    }

    let target = chain.last().unwrap();
    let graph = core.context
        .task_context(&planner, target.id, Some(5), Some(5), true)
        .await
        .unwrap();
    // 7 ancestors exist but depth caps the walk at 5.
    assert_eq!(graph.ancestors.len(), 5);
    assert!(graph.ancestors.iter().all(|n| n.depth <= 5));

    let again = core.context
        .task_context(&planner, target.id, Some(5), Some(5), true)
        .await
        .unwrap();
    let ids: Vec<_> = graph.ancestors.iter().map(|n| n.task_id).collect();
    let again_ids: Vec<_> = again.ancestors.iter().map(|n| n.task_id).collect();
    assert_eq!(ids, again_ids);

    // depth beyond the cap is refused
    let err = core.context
        .task_context(&planner, target.id, Some(6), None, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn context_cache_serves_memoized_subgraphs() {
    let (core, _clock) = core().await;
    let project = seed_project(&core, "alpha").await;
    let planner = planner(project.id);
    let a = seed_task(&core, project.id, "a").await;
    let b = seed_task(&core, project.id, "b").await;
    core.dag.add_dependency(&planner, project.id, a.id, b.id, UnlockOn::Implemented, None).await.unwrap();

    let first = core.context
        .task_context(&planner, b.id, None, None, false)
        .await
        .unwrap();
    // Cached response carries the original computation timestamp.
    let second = core.context
        .task_context(&planner, b.id, None, None, false)
        .await
        .unwrap();
    assert_eq!(first, second);

    // Bypass recomputes.
    let fresh = core.context
        .task_context(&planner, b.id, None, None, true)
        .await
        .unwrap();
    assert_eq!(fresh.ancestors.len(), first.ancestors.len());
}
